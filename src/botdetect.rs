//! Bot-Detection state machine (spec §4.7). A provider-block sentinel
//! observed in a subprocess's stderr transitions `(channel_url,
//! auth_context) -> OK -> SOFT_BLOCKED -> HARD_BLOCKED`.
//!
//! Guarded by a read-write lock per spec §5 ("frequent reads per worker,
//! rare writes at block transitions").

use crate::models::AuthContext;
use std::collections::HashMap;
use std::sync::RwLock;

/// Substring match against subprocess stderr, same technique the pack uses
/// for yt-dlp error classification (`examples/other_examples/.../ytdlp_errors`-
/// style substring sentinels).
const BOT_SENTINELS: &[&str] = &[
    "Sign in to confirm",
    "confirm you're not a bot",
    "HTTP Error 429",
];

pub(crate) fn stderr_has_bot_sentinel(stderr: &str) -> bool {
    BOT_SENTINELS.iter().any(|s| stderr.contains(s))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Ok,
    SoftBlocked { unblock_at_unix_secs: i64 },
    HardBlocked,
}

#[derive(Eq, Hash, PartialEq, Clone)]
struct Key {
    channel_url: String,
    auth_context: AuthContext,
}

/// Cool-down duration for a first sentinel hit before escalating to
/// `HARD_BLOCKED`.
pub(crate) const SOFT_COOLDOWN_SECS: i64 = 900;

pub(crate) struct BlockState {
    states: RwLock<HashMap<Key, State>>,
}

pub(crate) enum Transition {
    /// Channel is not and was not blocked; proceed.
    StillOk,
    /// First hit recorded; caller may retry after the cool-down elapses.
    NowSoftBlocked,
    /// Second hit within cool-down, or retries exhausted while soft-blocked:
    /// channel-wide hard block, sibling workers must be cancelled.
    NowHardBlocked,
    /// Already hard-blocked; no subprocess should have started.
    AlreadyHardBlocked,
}

impl Default for BlockState {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockState {
    pub(crate) fn new() -> BlockState {
        BlockState {
            states: RwLock::new(HashMap::new()),
        }
    }

    fn key(channel_url: &str, auth_context: AuthContext) -> Key {
        Key {
            channel_url: channel_url.to_string(),
            auth_context,
        }
    }

    /// Is this (channel_url, auth_context) currently hard-blocked? Read-only
    /// fast path consulted before starting any subprocess.
    pub(crate) fn is_hard_blocked(&self, channel_url: &str, auth_context: AuthContext) -> bool {
        let states = match self.states.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        matches!(
            states.get(&Self::key(channel_url, auth_context)),
            Some(State::HardBlocked)
        )
    }

    /// Record a sentinel hit, advancing the state machine. `now_unix_secs`
    /// is injected so the function stays deterministic and testable.
    pub(crate) fn record_sentinel(
        &self,
        channel_url: &str,
        auth_context: AuthContext,
        now_unix_secs: i64,
    ) -> Transition {
        let mut states = match self.states.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = Self::key(channel_url, auth_context);

        match states.get(&key).copied() {
            Some(State::HardBlocked) => Transition::AlreadyHardBlocked,
            Some(State::SoftBlocked { unblock_at_unix_secs }) if now_unix_secs < unblock_at_unix_secs => {
                // Second hit still within the cool-down window: escalate.
                states.insert(key, State::HardBlocked);
                Transition::NowHardBlocked
            }
            Some(State::SoftBlocked { .. }) | Some(State::Ok) | None => {
                states.insert(
                    key,
                    State::SoftBlocked {
                        unblock_at_unix_secs: now_unix_secs + SOFT_COOLDOWN_SECS,
                    },
                );
                Transition::NowSoftBlocked
            }
        }
    }

    /// Retries exhausted while soft-blocked escalate straight to hard block
    /// (spec §4.7: "after a retry exhaustion").
    pub(crate) fn escalate_on_retry_exhaustion(&self, channel_url: &str, auth_context: AuthContext) {
        let mut states = match self.states.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = Self::key(channel_url, auth_context);
        if matches!(states.get(&key), Some(State::SoftBlocked { .. })) {
            states.insert(key, State::HardBlocked);
        }
    }

    /// Manual resume or channel-level pause toggle clears the in-memory
    /// state for every auth context of this channel URL.
    pub(crate) fn clear(&self, channel_url: &str) {
        let mut states = match self.states.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        states.retain(|k, _| k.channel_url != channel_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_detection() {
        assert!(stderr_has_bot_sentinel("ERROR: Sign in to confirm you are not a bot"));
        assert!(!stderr_has_bot_sentinel("ERROR: video unavailable"));
    }

    #[test]
    fn first_hit_soft_blocks() {
        let bs = BlockState::new();
        let t = bs.record_sentinel("u1", AuthContext::Unauthenticated, 1000);
        assert!(matches!(t, Transition::NowSoftBlocked));
        assert!(!bs.is_hard_blocked("u1", AuthContext::Unauthenticated));
    }

    #[test]
    fn second_hit_hard_blocks() {
        let bs = BlockState::new();
        bs.record_sentinel("u1", AuthContext::Unauthenticated, 1000);
        let t = bs.record_sentinel("u1", AuthContext::Unauthenticated, 1001);
        assert!(matches!(t, Transition::NowHardBlocked));
        assert!(bs.is_hard_blocked("u1", AuthContext::Unauthenticated));
    }

    #[test]
    fn distinct_auth_contexts_are_independent() {
        let bs = BlockState::new();
        bs.record_sentinel("u1", AuthContext::Unauthenticated, 1000);
        bs.record_sentinel("u1", AuthContext::Unauthenticated, 1001);
        assert!(bs.is_hard_blocked("u1", AuthContext::Unauthenticated));
        assert!(!bs.is_hard_blocked("u1", AuthContext::Credentialed));
    }

    #[test]
    fn clear_resets_all_contexts_for_url() {
        let bs = BlockState::new();
        bs.record_sentinel("u1", AuthContext::Unauthenticated, 1000);
        bs.record_sentinel("u1", AuthContext::Unauthenticated, 1001);
        assert!(bs.is_hard_blocked("u1", AuthContext::Unauthenticated));
        bs.clear("u1");
        assert!(!bs.is_hard_blocked("u1", AuthContext::Unauthenticated));
    }

    #[test]
    fn second_hit_after_cooldown_expired_resets_to_soft() {
        let bs = BlockState::new();
        bs.record_sentinel("u1", AuthContext::Unauthenticated, 1000);
        let t = bs.record_sentinel("u1", AuthContext::Unauthenticated, 1000 + SOFT_COOLDOWN_SECS + 1);
        assert!(matches!(t, Transition::NowSoftBlocked));
        assert!(!bs.is_hard_blocked("u1", AuthContext::Unauthenticated));
    }

    #[test]
    fn retry_exhaustion_escalates_soft_to_hard() {
        let bs = BlockState::new();
        bs.record_sentinel("u1", AuthContext::Unauthenticated, 1000);
        bs.escalate_on_retry_exhaustion("u1", AuthContext::Unauthenticated);
        assert!(bs.is_hard_blocked("u1", AuthContext::Unauthenticated));
    }
}
