//! Crate-wide domain primitives.
//!
//! These types prevent primitive obsession for the identifiers and bounded
//! values threaded through every subsystem. Module-local domain types
//! (e.g. the supervisor's quality scores) live beside the module that owns
//! them; only values shared across module boundaries live here.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Opaque identifier for a conversation; the durable-store primary key.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ConversationId(Uuid);

impl ConversationId {
    /// Creates a new random conversation id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier for a tenant organization.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct OrganizationId(Uuid);

impl OrganizationId {
    /// Creates a new random organization id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// An agent's registry key, e.g. `"greeting_agent"`. Agent keys are plain
/// strings in the source system (routing tables, keyword maps, and the
/// dynamic-class-loading registry all index by this string), not UUIDs.
#[nutype(
    validate(len_char_min = 1, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct AgentKey(String);

impl AgentKey {
    /// The entry node of the graph; always instantiated.
    #[must_use]
    pub fn orchestrator() -> Self {
        Self::try_new("orchestrator").expect("literal satisfies validation")
    }

    /// The closed-loop quality gate node; always instantiated.
    #[must_use]
    pub fn supervisor() -> Self {
        Self::try_new("supervisor").expect("literal satisfies validation")
    }

    /// The agent used when routing cannot determine a better target.
    #[must_use]
    pub fn fallback() -> Self {
        Self::try_new("fallback_agent").expect("literal satisfies validation")
    }

    /// Whether this key names one of the two always-present system agents.
    #[must_use]
    pub fn is_system(&self) -> bool {
        *self == Self::orchestrator() || *self == Self::supervisor()
    }
}

/// A discrete label describing the user's goal (e.g. `"producto"`, `"saludo"`).
#[nutype(
    validate(len_char_min = 1, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct Intent(String);

impl Intent {
    /// The intent assigned when no analyzer produces a confident result.
    #[must_use]
    pub fn fallback() -> Self {
        Self::try_new("fallback").expect("literal satisfies validation")
    }
}

/// A confidence value in `[0.0, 1.0]`, used by intent results and quality
/// scores alike.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Into)
)]
pub struct UnitScore(f64);

impl UnitScore {
    /// The zero score.
    #[must_use]
    pub fn zero() -> Self {
        Self::try_new(0.0).expect("0.0 is in range")
    }

    /// Clamps an arbitrary float into the valid range rather than failing;
    /// used when combining several heuristic sub-scores that individually
    /// stay in range but whose weighted sum can drift past the boundary by
    /// floating-point error.
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        Self::try_new(value.clamp(0.0, 1.0)).expect("clamp guarantees range")
    }
}

/// Agent routing priority, higher is evaluated first. Ties break on
/// `AgentKey` ascending order.
#[nutype(
    validate(less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 50
)]
pub struct Priority(u8);

/// A point in time, wrapping `SystemTime` so persisted/cached timestamps
/// are never confused with arbitrary `SystemTime` arithmetic elsewhere.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize
))]
pub struct Timestamp(SystemTime);

impl Timestamp {
    /// The current time.
    #[must_use]
    pub fn now() -> Self {
        Self::new(SystemTime::now())
    }

    /// The wrapped `SystemTime`.
    #[must_use]
    pub fn as_system_time(&self) -> SystemTime {
        self.into_inner()
    }

    /// Milliseconds elapsed since this timestamp, or `None` if it is in the
    /// future relative to now.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.into_inner().elapsed().ok()
    }
}

/// Bound on `agent_history` / routing-attempt counters; caps the worst-case
/// loop length at 9 worker invocations per turn regardless of supervisor
/// advice.
#[nutype(
    validate(less_or_equal = 3),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 3
)]
pub struct MaxAttempts(u8);

/// Turn-scoped counter (routing attempts, supervisor retries, error count).
/// Unbounded above so comparisons against `MaxAttempts` remain meaningful
/// even once a turn has exceeded its cap and is being wound down.
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        Into
    ),
    default = 0
)]
pub struct Counter(u32);

impl Counter {
    /// Returns a counter one greater than this one.
    #[must_use]
    pub fn increment(self) -> Self {
        Self::new(self.into_inner() + 1)
    }

    /// Whether this counter has reached or passed `bound`.
    #[must_use]
    pub fn at_least(self, bound: MaxAttempts) -> bool {
        self.into_inner() >= u32::from(bound.into_inner())
    }
}
