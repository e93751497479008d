//! Access checks applied at the top of every operation handler.
//!
//! Three independent knobs, all from [`AccessConfig`]: an allowlist gate on
//! write operations, a "writes must carry an actor" requirement, and an
//! "acting party must match the entity's own party field" assertion.

use opentrade_types::{AccessConfig, AccessMode, ActorId, OpentradeError, Result};

/// Whether an operation reads or mutates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

/// Gate an operation on the configured access mode.
pub fn assert_access(config: &AccessConfig, actor: Option<&ActorId>, action: Action) -> Result<()> {
    if config.mode == AccessMode::Open || action == Action::Read {
        return Ok(());
    }
    let Some(actor) = actor else {
        return Err(OpentradeError::AuthRequired {
            reason: "actor is required for write operations".to_string(),
        });
    };
    let allowed = config
        .allow_actors
        .iter()
        .any(|entry| ActorId::new(entry.clone()).matches(actor));
    if allowed {
        Ok(())
    } else {
        Err(OpentradeError::Forbidden {
            reason: "actor is not on the allowlist".to_string(),
        })
    }
}

/// Enforce the `require_actor` knob for write operations.
pub fn require_actor(config: &AccessConfig, actor: Option<&ActorId>) -> Result<()> {
    if config.require_actor && actor.is_none() {
        return Err(OpentradeError::AuthRequired {
            reason: "actor is required".to_string(),
        });
    }
    Ok(())
}

/// An actor the operation cannot proceed without, regardless of config.
pub fn demand_actor(actor: Option<&ActorId>) -> Result<&ActorId> {
    actor.filter(|a| !a.is_empty()).ok_or_else(|| {
        OpentradeError::AuthRequired {
            reason: "actor is required".to_string(),
        }
    })
}

/// Enforce the `require_actor_match` knob: the acting party must be the
/// entity party named by `label`.
pub fn assert_actor_match(
    config: &AccessConfig,
    actor: Option<&ActorId>,
    expected: &ActorId,
    label: &str,
) -> Result<()> {
    if !config.require_actor_match {
        return Ok(());
    }
    let Some(actor) = actor else {
        return Ok(());
    };
    if actor.matches(expected) {
        Ok(())
    } else {
        Err(OpentradeError::Forbidden {
            reason: format!("actor does not match {label}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist_config() -> AccessConfig {
        AccessConfig {
            mode: AccessMode::Allowlist,
            allow_actors: vec!["0xAAA".to_string()],
            require_actor: true,
            require_actor_match: true,
        }
    }

    #[test]
    fn open_mode_allows_everything() {
        let config = AccessConfig::default();
        assert!(assert_access(&config, None, Action::Write).is_ok());
        assert!(assert_access(&config, None, Action::Read).is_ok());
    }

    #[test]
    fn allowlist_gates_writes_only() {
        let config = allowlist_config();
        let listed = ActorId::new("0xaaa");
        let unlisted = ActorId::new("0xbbb");
        assert!(assert_access(&config, Some(&listed), Action::Write).is_ok());
        assert!(matches!(
            assert_access(&config, Some(&unlisted), Action::Write),
            Err(OpentradeError::Forbidden { .. })
        ));
        // Reads pass without any actor.
        assert!(assert_access(&config, None, Action::Read).is_ok());
    }

    #[test]
    fn missing_actor_is_auth_required() {
        let config = allowlist_config();
        assert!(matches!(
            assert_access(&config, None, Action::Write),
            Err(OpentradeError::AuthRequired { .. })
        ));
        assert!(matches!(
            require_actor(&config, None),
            Err(OpentradeError::AuthRequired { .. })
        ));
    }

    #[test]
    fn actor_match_is_case_insensitive() {
        let config = allowlist_config();
        let actor = ActorId::new("0xAbC");
        let expected = ActorId::new("0xabc");
        assert!(assert_actor_match(&config, Some(&actor), &expected, "buyer").is_ok());
        let other = ActorId::new("0xdef");
        assert!(assert_actor_match(&config, Some(&other), &expected, "buyer").is_err());
    }

    #[test]
    fn actor_match_disabled_accepts_anyone() {
        let config = AccessConfig::default();
        let actor = ActorId::new("stranger");
        let expected = ActorId::new("seller");
        assert!(assert_actor_match(&config, Some(&actor), &expected, "seller").is_ok());
    }
}
