//! Static registry of board identities.

use std::collections::HashSet;

use fleetota_core::ServerConfig;

/// Board ids known to the service. Ids are never created at runtime.
#[derive(Debug, Clone, Default)]
pub struct BoardRegistry {
    known: HashSet<String>,
    test: HashSet<String>,
}

impl BoardRegistry {
    pub fn new<I, J>(known: I, test: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            known: known.into_iter().collect(),
            test: test.into_iter().collect(),
        }
    }

    /// Test boards are only registered when test mode is enabled.
    pub fn from_config(config: &ServerConfig) -> Self {
        let test = if config.test_mode.enabled {
            config.test_mode.boards.clone()
        } else {
            Vec::new()
        };
        Self::new(config.known_boards.clone(), test)
    }

    /// Member of the known or known-test set.
    pub fn is_known(&self, board_id: &str) -> bool {
        self.known.contains(board_id) || self.test.contains(board_id)
    }

    pub fn is_test(&self, board_id: &str) -> bool {
        self.test.contains(board_id)
    }

    pub fn len(&self) -> usize {
        self.known.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty() && self.test.is_empty()
    }
}
