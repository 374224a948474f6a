use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::model::{Entity, EntityKind, UserId};
use crate::state::query::SortKey;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_banned: bool,
    #[serde(default)]
    pub teams: Vec<String>,
}

fn default_role() -> String {
    "user".to_owned()
}

impl ChatUser {
    pub fn new(id: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: None,
            role: default_role(),
            is_online: false,
            last_active_at: None,
            created_at,
            updated_at: created_at,
            is_banned: false,
            teams: Vec::new(),
        }
    }
}

impl Entity for ChatUser {
    type Id = UserId;
    type SortKey = UserListSortingKey;

    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> UserId {
        self.id.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserListSortingKey {
    Id,
    Name,
    Role,
    IsOnline,
    LastActiveAt,
    CreatedAt,
    UpdatedAt,
}

impl SortKey<ChatUser> for UserListSortingKey {
    fn compare(&self, lhs: &ChatUser, rhs: &ChatUser) -> Ordering {
        match self {
            UserListSortingKey::Id => lhs.id.cmp(&rhs.id),
            UserListSortingKey::Name => lhs.name.cmp(&rhs.name),
            UserListSortingKey::Role => lhs.role.cmp(&rhs.role),
            UserListSortingKey::IsOnline => lhs.is_online.cmp(&rhs.is_online),
            UserListSortingKey::LastActiveAt => lhs.last_active_at.cmp(&rhs.last_active_at),
            UserListSortingKey::CreatedAt => lhs.created_at.cmp(&rhs.created_at),
            UserListSortingKey::UpdatedAt => lhs.updated_at.cmp(&rhs.updated_at),
        }
    }
}
