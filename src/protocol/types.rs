//! Packet type registry.
//!
//! Maps packet type names and wire ids to immutable descriptors. A registry
//! is built once from one or more [`TypeTable`]s merged in order; later
//! tables override earlier entries with the same name.
//!
//! # Example
//!
//! ```
//! use gearman_packet::protocol::{BodyKind, Registry, TypeTable};
//!
//! let extra = TypeTable::new().packet("SUBMIT_REDUCE_JOB", 37, &["function", "uniqueid"], BodyKind::Stream);
//! let registry = Registry::with_types(&extra);
//!
//! assert_eq!(registry.by_id(37).unwrap().name, "SUBMIT_REDUCE_JOB");
//! assert_eq!(registry.by_name("SUBMIT_JOB").unwrap().id, 7);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::error::{PacketError, Result};

/// How a packet type carries its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// No separate body. The last argument is sent unterminated in its place.
    None,
    /// Fixed-length text body, read whole.
    Text,
    /// Length-declared byte stream, delivered as it arrives.
    Stream,
}

/// Descriptor for a binary packet type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketType {
    /// Wire id.
    pub id: u32,
    /// Type name (e.g. `SUBMIT_JOB`).
    pub name: String,
    /// Argument names in wire order.
    pub args: Vec<String>,
    /// Body kind.
    pub body: BodyKind,
}

impl PacketType {
    /// Create a new descriptor.
    pub fn new(id: u32, name: impl Into<String>, args: &[&str], body: BodyKind) -> Self {
        Self {
            id,
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            body,
        }
    }

    /// Descriptor synthesized for a wire id the registry does not know.
    pub fn unknown(id: u32) -> Self {
        Self::new(id, format!("unknown#{}", id), &[], BodyKind::Stream)
    }

    /// Whether the packet has a body separate from its arguments.
    #[inline]
    pub fn has_body(&self) -> bool {
        self.body != BodyKind::None
    }

    /// Number of arguments sent NUL-terminated.
    ///
    /// Without a separate body the last argument takes the body's place
    /// and is not terminated.
    #[inline]
    pub fn terminated_args(&self) -> usize {
        if !self.has_body() && !self.args.is_empty() {
            self.args.len() - 1
        } else {
            self.args.len()
        }
    }

    /// Name of the argument carried in the body position, if any.
    #[inline]
    pub fn body_arg(&self) -> Option<&str> {
        if self.has_body() {
            None
        } else {
            self.args.last().map(String::as_str)
        }
    }
}

/// Descriptor for an admin (text protocol) packet type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminType {
    /// Type name (e.g. `ok`).
    pub name: String,
    /// Argument names.
    pub args: Vec<String>,
}

impl AdminType {
    /// Create a new admin descriptor.
    pub fn new(name: impl Into<String>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct PacketTypeDef {
    name: String,
    id: u32,
    args: Vec<String>,
    body: BodyKind,
}

#[derive(Debug, Clone)]
struct AdminTypeDef {
    name: String,
    args: Vec<String>,
}

/// A partial type table, merged into a [`Registry`].
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    packets: Vec<PacketTypeDef>,
    admin: Vec<AdminTypeDef>,
}

impl TypeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binary packet type.
    pub fn packet(mut self, name: &str, id: u32, args: &[&str], body: BodyKind) -> Self {
        self.packets.push(PacketTypeDef {
            name: name.to_string(),
            id,
            args: args.iter().map(|a| a.to_string()).collect(),
            body,
        });
        self
    }

    /// Add an admin packet type.
    pub fn admin(mut self, name: &str, args: &[&str]) -> Self {
        self.admin.push(AdminTypeDef {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    /// The built-in Gearman packet types.
    pub fn defaults() -> Self {
        use BodyKind::{None as Bare, Stream, Text};

        Self::new()
            .admin("error", &["code", "message"])
            .admin("ok", &["line"])
            .admin("line", &["line"])
            .admin("block-complete", &[])
            .packet("CAN_DO", 1, &["function"], Bare)
            .packet("CANT_DO", 2, &["function"], Bare)
            .packet("RESET_ABILITIES", 3, &[], Bare)
            .packet("PRE_SLEEP", 4, &[], Bare)
            .packet("NOOP", 6, &[], Bare)
            .packet("SUBMIT_JOB", 7, &["function", "uniqueid"], Stream)
            .packet("JOB_CREATED", 8, &["job"], Bare)
            .packet("GRAB_JOB", 9, &[], Bare)
            .packet("NO_JOB", 10, &[], Bare)
            .packet("JOB_ASSIGN", 11, &["job", "function"], Stream)
            .packet("WORK_STATUS", 12, &["job", "complete", "total"], Bare)
            .packet("WORK_COMPLETE", 13, &["job"], Stream)
            .packet("WORK_FAIL", 14, &["job"], Bare)
            .packet("GET_STATUS", 15, &["job"], Bare)
            .packet("ECHO_REQ", 16, &[], Stream)
            .packet("ECHO_RES", 17, &[], Stream)
            .packet("SUBMIT_JOB_BG", 18, &["function", "uniqueid"], Stream)
            .packet("ERROR", 19, &["errorcode"], Text)
            .packet(
                "STATUS_RES",
                20,
                &["job", "known", "running", "complete", "total"],
                Bare,
            )
            .packet("SUBMIT_JOB_HIGH", 21, &["function", "uniqueid"], Stream)
            .packet("SET_CLIENT_ID", 22, &["workerid"], Bare)
            .packet("CAN_DO_TIMEOUT", 23, &["function", "timeout"], Bare)
            .packet("ALL_YOURS", 24, &[], Bare)
            .packet("WORK_EXCEPTION", 25, &["job"], Stream)
            .packet("OPTION_REQ", 26, &["option"], Bare)
            .packet("OPTION_RES", 27, &["option"], Bare)
            .packet("WORK_DATA", 28, &["job"], Stream)
            .packet("WORK_WARNING", 29, &["job"], Stream)
            .packet("GRAB_JOB_UNIQ", 30, &[], Bare)
            .packet(
                "JOB_ASSIGN_UNIQ",
                31,
                &["job", "function", "uniqueid"],
                Stream,
            )
            .packet("SUBMIT_JOB_HIGH_BG", 32, &["function", "uniqueid"], Stream)
            .packet("SUBMIT_JOB_LOW", 33, &["function", "uniqueid"], Stream)
            .packet("SUBMIT_JOB_LOW_BG", 34, &["function", "uniqueid"], Stream)
            .packet(
                "SUBMIT_JOB_SCHED",
                35,
                &["function", "uniqueid", "minute", "hour", "day", "month", "dow"],
                Stream,
            )
            .packet(
                "SUBMIT_JOB_EPOCH",
                36,
                &["function", "uniqueid", "time"],
                Stream,
            )
    }
}

/// Immutable lookup structure for packet types.
#[derive(Debug, Default)]
pub struct Registry {
    /// Binary types by name.
    types: HashMap<String, Arc<PacketType>>,
    /// Binary types by wire id.
    types_by_id: HashMap<u32, Arc<PacketType>>,
    /// Admin types by name.
    admin_types: HashMap<String, Arc<AdminType>>,
}

impl Registry {
    /// Merge tables in order. Later entries replace earlier ones by name.
    pub fn merge<'a, I>(tables: I) -> Self
    where
        I: IntoIterator<Item = &'a TypeTable>,
    {
        let mut registry = Registry::default();

        for table in tables {
            for def in &table.packets {
                let packet_type = Arc::new(PacketType {
                    id: def.id,
                    name: def.name.clone(),
                    args: def.args.clone(),
                    body: def.body,
                });

                if let Some(previous) = registry.types.insert(def.name.clone(), packet_type.clone())
                {
                    // Drop the stale id so both lookups agree.
                    if previous.id != def.id
                        && registry
                            .types_by_id
                            .get(&previous.id)
                            .is_some_and(|t| t.name == def.name)
                    {
                        registry.types_by_id.remove(&previous.id);
                    }
                }
                registry.types_by_id.insert(def.id, packet_type);
            }

            for def in &table.admin {
                registry.admin_types.insert(
                    def.name.clone(),
                    Arc::new(AdminType {
                        name: def.name.clone(),
                        args: def.args.clone(),
                    }),
                );
            }
        }

        registry
    }

    /// Registry with only the built-in types.
    pub fn with_default_types() -> Self {
        Self::merge([&TypeTable::defaults()])
    }

    /// Built-in types extended (or overridden) by `extra`.
    pub fn with_types(extra: &TypeTable) -> Self {
        Self::merge([&TypeTable::defaults(), extra])
    }

    /// Registry containing only the given table.
    pub fn with_only_types(table: &TypeTable) -> Self {
        Self::merge([table])
    }

    /// Shared registry of the built-in types, built on first use.
    pub fn shared_default() -> Arc<Registry> {
        static DEFAULT: OnceLock<Arc<Registry>> = OnceLock::new();
        DEFAULT
            .get_or_init(|| Arc::new(Registry::with_default_types()))
            .clone()
    }

    /// Look up a binary type by name.
    pub fn by_name(&self, name: &str) -> Option<Arc<PacketType>> {
        self.types.get(name).cloned()
    }

    /// Look up a binary type by wire id.
    pub fn by_id(&self, id: u32) -> Option<Arc<PacketType>> {
        self.types_by_id.get(&id).cloned()
    }

    /// Look up an admin type by name.
    pub fn admin(&self, name: &str) -> Option<Arc<AdminType>> {
        self.admin_types.get(name).cloned()
    }

    /// Look up a binary type by name, failing if it is not registered.
    pub fn packet_type(&self, name: &str) -> Result<Arc<PacketType>> {
        self.by_name(name)
            .ok_or_else(|| PacketError::UnknownTypeName(name.to_string()))
    }

    /// Look up an admin type by name, failing if it is not registered.
    pub fn admin_type(&self, name: &str) -> Result<Arc<AdminType>> {
        self.admin(name)
            .ok_or_else(|| PacketError::UnknownTypeName(name.to_string()))
    }

    /// Iterate over all binary types.
    pub fn types(&self) -> impl Iterator<Item = &Arc<PacketType>> {
        self.types.values()
    }

    /// Number of registered binary types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no binary types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
