//! Mutation events broadcast from a provider to its subscribers.

/// A change to a provider's ordered cache. Indices refer to positions in
/// the cache after the change was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Append { index: usize },
    Update { index: usize },
    Insert { index: usize },
    Remove { index: usize },
    Rebuild { index: usize },
    /// `count` records were evicted from the head.
    Prune { count: usize },
}

impl Mutation {
    /// First position a subscriber has to recompute, or `None` when the
    /// event is handled without replay.
    pub fn replay_from(&self) -> Option<usize> {
        match *self {
            Mutation::Update { index }
            | Mutation::Insert { index }
            | Mutation::Remove { index }
            | Mutation::Rebuild { index } => Some(index),
            Mutation::Append { .. } | Mutation::Prune { .. } => None,
        }
    }

    /// Same kind of event at another position.
    pub fn at(&self, index: usize) -> Mutation {
        match *self {
            Mutation::Append { .. } => Mutation::Append { index },
            Mutation::Update { .. } => Mutation::Update { index },
            Mutation::Insert { .. } => Mutation::Insert { index },
            Mutation::Remove { .. } => Mutation::Remove { index },
            Mutation::Rebuild { .. } => Mutation::Rebuild { index },
            Mutation::Prune { count } => Mutation::Prune { count },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_positions() {
        assert_eq!(Mutation::Append { index: 4 }.replay_from(), None);
        assert_eq!(Mutation::Prune { count: 2 }.replay_from(), None);
        assert_eq!(Mutation::Insert { index: 3 }.replay_from(), Some(3));
        assert_eq!(Mutation::Remove { index: 0 }.replay_from(), Some(0));
        assert_eq!(Mutation::Update { index: 9 }.replay_from(), Some(9));
        assert_eq!(Mutation::Rebuild { index: 1 }.replay_from(), Some(1));
    }

    #[test]
    fn at_keeps_kind() {
        assert_eq!(
            Mutation::Insert { index: 3 }.at(1),
            Mutation::Insert { index: 1 }
        );
        assert_eq!(Mutation::Prune { count: 2 }.at(7), Mutation::Prune { count: 2 });
    }
}
