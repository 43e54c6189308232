//! redb table definitions for the FleetGrid record store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

pub(crate) type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Machine records keyed by `{space}:{machine}`.
pub const MACHINES: JsonTable = TableDefinition::new("machines");

/// Machinetype abort history keyed by `{space}:{machinetype}`.
pub const MACHINETYPES: JsonTable = TableDefinition::new("machinetypes");

/// Published space info keyed by `{space}`.
pub const SPACES: JsonTable = TableDefinition::new("spaces");

/// Per-cycle snapshots keyed by `{space}:{epoch:020}`.
pub const SNAPSHOTS: JsonTable = TableDefinition::new("snapshots");

/// Terminal accounting records keyed by `{space}:{machine}`.
pub const ACCOUNTING: JsonTable = TableDefinition::new("accounting");

/// Latest heartbeat per machine keyed by `{space}:{machine}`.
pub const HEARTBEATS: JsonTable = TableDefinition::new("heartbeats");

/// Live machine lists keyed by `{space}:{machinetype}`.
pub const LIVENESS: JsonTable = TableDefinition::new("liveness");

pub(crate) const ALL: [JsonTable; 7] = [
    MACHINES,
    MACHINETYPES,
    SPACES,
    SNAPSHOTS,
    ACCOUNTING,
    HEARTBEATS,
    LIVENESS,
];
