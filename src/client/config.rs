use serde::{Deserialize, Serialize};

use crate::logger::LogLevel;
use crate::state::constants::{
    DEFAULT_CHANNELS_PAGE_SIZE, DEFAULT_MEMBERS_PAGE_SIZE, DEFAULT_MESSAGES_PAGE_SIZE,
    DEFAULT_REACTIONS_PAGE_SIZE, DEFAULT_SEARCH_PAGE_SIZE, DEFAULT_USERS_PAGE_SIZE,
};
use crate::state::diff::DiffOptions;
use crate::state::error::{invalid_argument, StateResult};
use crate::state::model::UserId;
use crate::state::observer::DeliveryMode;

/// Settings shared by every facade a [`ChatClient`](super::ChatClient) creates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatClientConfig {
    pub channels_page_size: usize,
    pub messages_page_size: usize,
    pub members_page_size: usize,
    pub reactions_page_size: usize,
    pub users_page_size: usize,
    pub search_page_size: usize,
    pub delivery: DeliveryMode,
    pub diff: DiffOptions,
    /// Parsed with [`LogLevel`]'s parser; unset keeps the current level.
    pub log_level: Option<String>,
    /// The current user. Commands acting on behalf of a user require it.
    pub user_id: Option<UserId>,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            channels_page_size: DEFAULT_CHANNELS_PAGE_SIZE,
            messages_page_size: DEFAULT_MESSAGES_PAGE_SIZE,
            members_page_size: DEFAULT_MEMBERS_PAGE_SIZE,
            reactions_page_size: DEFAULT_REACTIONS_PAGE_SIZE,
            users_page_size: DEFAULT_USERS_PAGE_SIZE,
            search_page_size: DEFAULT_SEARCH_PAGE_SIZE,
            delivery: DeliveryMode::default(),
            diff: DiffOptions::default(),
            log_level: None,
            user_id: None,
        }
    }
}

impl ChatClientConfig {
    pub fn from_json_str(json: &str) -> StateResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| invalid_argument(format!("Invalid client configuration: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn validate(&self) -> StateResult<()> {
        let page_sizes = [
            ("channels_page_size", self.channels_page_size),
            ("messages_page_size", self.messages_page_size),
            ("members_page_size", self.members_page_size),
            ("reactions_page_size", self.reactions_page_size),
            ("users_page_size", self.users_page_size),
            ("search_page_size", self.search_page_size),
        ];
        if let Some((name, _)) = page_sizes.iter().find(|(_, size)| *size == 0) {
            return Err(invalid_argument(format!("{name} must be positive")));
        }
        if !(0.0..=1.0).contains(&self.diff.full_replace_ratio) {
            return Err(invalid_argument(
                "diff.full_replace_ratio must be between 0 and 1",
            ));
        }
        self.parsed_log_level()?;
        Ok(())
    }

    pub(crate) fn parsed_log_level(&self) -> StateResult<Option<LogLevel>> {
        self.log_level
            .as_deref()
            .map(|level| {
                level
                    .parse::<LogLevel>()
                    .map_err(|err| invalid_argument(err.to_string()))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config =
            ChatClientConfig::from_json_str(r#"{"channels_page_size": 10, "delivery": "immediate"}"#)
                .unwrap();
        assert_eq!(config.channels_page_size, 10);
        assert_eq!(config.messages_page_size, DEFAULT_MESSAGES_PAGE_SIZE);
        assert_eq!(config.delivery, DeliveryMode::Immediate);
    }

    #[test]
    fn rejects_zero_page_sizes_and_bad_levels() {
        let err = ChatClientConfig::from_json_str(r#"{"users_page_size": 0}"#).unwrap_err();
        assert!(err.message().contains("users_page_size"));

        let config = ChatClientConfig {
            log_level: Some("chatty".into()),
            ..ChatClientConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
