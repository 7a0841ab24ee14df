use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use quill_types::models::CursorBroadcast;

/// Latest cursor of each remote collaborator. Never holds the local user.
#[derive(Debug, Clone)]
pub struct RemoteCursors {
    local_user: Uuid,
    cursors: HashMap<Uuid, CursorBroadcast>,
}

impl RemoteCursors {
    pub fn new(local_user: Uuid) -> Self {
        Self {
            local_user,
            cursors: HashMap::new(),
        }
    }

    /// Last write wins. Returns false for the local user's own cursor.
    pub fn apply(&mut self, cursor: CursorBroadcast) -> bool {
        if cursor.user_id == self.local_user {
            return false;
        }
        self.cursors.insert(cursor.user_id, cursor);
        true
    }

    /// Drop cursors of users no longer present.
    pub fn retain_present(&mut self, present: &HashSet<Uuid>) {
        self.cursors.retain(|id, _| present.contains(id));
    }

    pub fn get(&self, user_id: Uuid) -> Option<&CursorBroadcast> {
        self.cursors.get(&user_id)
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn clear(&mut self) {
        self.cursors.clear();
    }

    pub fn snapshot(&self) -> Vec<CursorBroadcast> {
        self.cursors.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use quill_types::models::CursorRect;

    use super::*;

    fn cursor(user_id: Uuid, x: f64) -> CursorBroadcast {
        CursorBroadcast {
            user_id,
            color: "#000".into(),
            rect: CursorRect { x, y: 0.0, width: 1.0, height: 16.0 },
        }
    }

    #[test]
    fn one_entry_per_remote_user_never_self() {
        let me = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut board = RemoteCursors::new(me);

        assert!(!board.apply(cursor(me, 1.0)));
        board.apply(cursor(a, 1.0));
        board.apply(cursor(a, 2.0));
        board.apply(cursor(b, 3.0));

        assert_eq!(board.len(), 2);
        assert_eq!(board.get(a).unwrap().rect.x, 2.0);
        assert!(board.get(me).is_none());

        board.retain_present(&HashSet::from([b]));
        assert_eq!(board.len(), 1);
        assert!(board.get(a).is_none());
    }
}
