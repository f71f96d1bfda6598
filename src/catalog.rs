//! Context providers by name

use crate::context::ContextRegistry;
use crate::error::{ContextError, Result};
use crate::namespace::{self, NamespaceKind};
use crate::pid_context;
use std::fmt;
use std::str::FromStr;

/// Every context field this crate can attach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Namespace(NamespaceKind),
    Vpid,
    Vtid,
}

impl ContextKind {
    pub fn all() -> Vec<ContextKind> {
        NamespaceKind::ALL
            .iter()
            .map(|&kind| ContextKind::Namespace(kind))
            .chain([ContextKind::Vpid, ContextKind::Vtid])
            .collect()
    }

    /// Field name in the event stream
    pub fn name(self) -> &'static str {
        match self {
            ContextKind::Namespace(kind) => kind.field_name(),
            ContextKind::Vpid => "vpid",
            ContextKind::Vtid => "vtid",
        }
    }

    /// Register this field with its default provider
    pub fn attach(self, registry: &mut ContextRegistry) -> Result<()> {
        match self {
            ContextKind::Namespace(kind) => namespace::add_namespace_context(registry, kind),
            ContextKind::Vpid => pid_context::add_vpid_context(registry),
            ContextKind::Vtid => pid_context::add_vtid_context(registry),
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ContextKind {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        ContextKind::all()
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ContextError::UnknownContext {
                name: s.to_string(),
            })
    }
}

/// Attach fields by name, in order, stopping at the first failure
pub fn attach_all<'a>(
    registry: &mut ContextRegistry,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    for name in names {
        name.parse::<ContextKind>()?.attach(registry)?;
    }
    Ok(())
}
