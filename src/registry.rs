use std::collections::HashMap;
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::identity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no room with id {0}")]
pub struct RoomNotFound(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: String,
    pub conn_id: String,
}

/// A rendezvous room. Members are ordered by join time; index 0 is the
/// creator. Rooms are never removed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub members: Vec<Member>,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    /// Membership snapshot taken before the joiner was appended.
    pub present: Vec<Member>,
    pub user_id: String,
}

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        RoomRegistry {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_room(&self, name: &str, conn_id: &str) -> Created {
        let room_id = identity::new_room_id();
        let user_id = identity::new_user_id();
        let room = Room {
            id: room_id.clone(),
            name: name.to_string(),
            members: vec![Member {
                user_id: user_id.clone(),
                conn_id: conn_id.to_string(),
            }],
            created_at: SystemTime::now(),
        };

        let mut rooms = self.rooms.write().await;
        rooms.insert(room_id.clone(), room);

        Created { room_id, user_id }
    }

    /// Snapshot the member list, then append the joiner, under one write
    /// lock. Concurrent joins against the same room serialize here, so a
    /// joiner's present list never omits a member who joined earlier.
    pub async fn join_room(&self, room_id: &str, conn_id: &str) -> Result<Joined, RoomNotFound> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomNotFound(room_id.to_string()))?;

        let user_id = identity::new_user_id();
        let present = room.members.clone();
        room.members.push(Member {
            user_id: user_id.clone(),
            conn_id: conn_id.to_string(),
        });

        Ok(Joined { present, user_id })
    }

    pub async fn member_conn(&self, room_id: &str, user_id: &str) -> Option<String> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(room_id)?;
        room.members
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| m.conn_id.clone())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn members(&self, room_id: &str) -> Option<Vec<Member>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|r| r.members.clone())
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn create_room_returns_distinct_ids() {
        let registry = RoomRegistry::new();
        let a = registry.create_room("foo", "c1").await;
        let b = registry.create_room("foo", "c2").await;
        assert_ne!(a.room_id, b.room_id);
        assert_ne!(a.user_id, b.user_id);
    }

    #[tokio::test]
    async fn creator_is_first_member() {
        let registry = RoomRegistry::new();
        let created = registry.create_room("foo", "c1").await;
        let members = registry.members(&created.room_id).await.expect("room");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, created.user_id);
        assert_eq!(members[0].conn_id, "c1");
    }

    #[tokio::test]
    async fn join_unknown_room_fails_without_mutation() {
        let registry = RoomRegistry::new();
        registry.create_room("foo", "c1").await;

        let before = registry.room_count().await;
        let result = registry.join_room("nope", "c2").await;
        assert_eq!(result, Err(RoomNotFound("nope".into())));
        assert_eq!(registry.room_count().await, before);
    }

    #[tokio::test]
    async fn present_list_excludes_the_joiner() {
        let registry = RoomRegistry::new();
        let created = registry.create_room("foo", "c1").await;
        let joined = registry.join_room(&created.room_id, "c2").await.expect("join");

        assert_eq!(joined.present.len(), 1);
        assert_eq!(joined.present[0].user_id, created.user_id);
        assert!(joined.present.iter().all(|m| m.user_id != joined.user_id));
    }

    #[tokio::test]
    async fn members_accumulate_in_join_order() {
        let registry = RoomRegistry::new();
        let created = registry.create_room("foo", "c1").await;
        let second = registry.join_room(&created.room_id, "c2").await.expect("join");
        let third = registry.join_room(&created.room_id, "c3").await.expect("join");

        assert_eq!(second.present.len(), 1);
        assert_eq!(third.present.len(), 2);
        assert_eq!(third.present[0].user_id, created.user_id);
        assert_eq!(third.present[1].user_id, second.user_id);
    }

    #[tokio::test]
    async fn concurrent_joins_never_lose_members() {
        let registry = Arc::new(RoomRegistry::new());
        let created = registry.create_room("foo", "c0").await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            let room_id = created.room_id.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .join_room(&room_id, &format!("c{}", i + 1))
                    .await
                    .expect("join")
            }));
        }

        let mut present_sizes = Vec::new();
        for handle in handles {
            present_sizes.push(handle.await.expect("task").present.len());
        }
        present_sizes.sort_unstable();

        // Each join observed a strictly larger snapshot than the one before.
        assert_eq!(present_sizes, (1..=16).collect::<Vec<_>>());

        let members = registry.members(&created.room_id).await.expect("room");
        assert_eq!(members.len(), 17);
    }
}
