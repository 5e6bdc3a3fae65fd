// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use serde::Deserialize;

use crate::kits::{Kit, KitSample};

/// A YAML representation of a kit beyond the built-in ones.
#[derive(Deserialize, Clone, Debug)]
pub struct KitDefinition {
    id: String,
    display_name: Option<String>,
    /// One sample per pad, in pad order.
    samples: Vec<KitSample>,
}

impl KitDefinition {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn to_kit(&self) -> Kit {
        Kit::new(
            &self.id,
            self.display_name.as_deref().unwrap_or(&self.id),
            self.samples.clone(),
        )
    }
}
