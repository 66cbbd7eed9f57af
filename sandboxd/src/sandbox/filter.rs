/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use super::{SandboxRecord, SandboxState};
use std::collections::BTreeMap;

/// Narrows a sandbox listing. All set criteria must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxFilter {
    /// Exact id or an id prefix.
    pub id: Option<String>,
    pub state: Option<SandboxState>,
    pub label_selector: BTreeMap<String, String>,
}

impl SandboxFilter {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_state(mut self, state: SandboxState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_label(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let _ = self.label_selector.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, record: &SandboxRecord) -> bool {
        if let Some(id) = &self.id {
            if !record.id.has_prefix(id) {
                return false;
            }
        }

        if let Some(state) = self.state {
            if record.state != state {
                return false;
            }
        }

        self.label_selector
            .iter()
            .all(|(k, v)| record.labels.get(k).is_some_and(|x| x == v))
    }
}
