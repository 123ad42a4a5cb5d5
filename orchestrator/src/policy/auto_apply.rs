//! Effective auto-apply policy for a stack.
//!
//! The narrowest explicit setting wins: stack, then the stack's host (or
//! group), then the global setting stored in the database, then the
//! environment default.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::errors::OrchError;
use crate::models::inventory::{ScopeKind, Stack};
use crate::store::catalog::{Inventory, StackCatalog};
use crate::store::overrides::{OverrideScope, OverrideStore};

/// Level that decided the effective value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PolicySource {
    #[serde(rename = "stack")]
    Stack,
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "group")]
    Group,
    #[serde(rename = "global-db")]
    GlobalDb,
    #[serde(rename = "env-default")]
    EnvDefault,
}

impl PolicySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicySource::Stack => "stack",
            PolicySource::Host => "host",
            PolicySource::Group => "group",
            PolicySource::GlobalDb => "global-db",
            PolicySource::EnvDefault => "env-default",
        }
    }
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectivePolicy {
    pub enabled: bool,
    pub source: PolicySource,
}

/// Explicit settings gathered for one stack, narrowest first
#[derive(Debug, Clone, Default)]
pub struct PolicyLevels {
    pub stack: Option<bool>,
    pub host: Option<bool>,
    /// Group overrides in evaluation order
    pub groups: Vec<Option<bool>>,
    pub global: Option<bool>,
}

impl PolicyLevels {
    /// Pure resolution over already-loaded levels
    pub fn resolve(&self, env_default: bool) -> EffectivePolicy {
        if let Some(enabled) = self.stack {
            return EffectivePolicy {
                enabled,
                source: PolicySource::Stack,
            };
        }
        if let Some(enabled) = self.host {
            return EffectivePolicy {
                enabled,
                source: PolicySource::Host,
            };
        }
        if let Some(enabled) = self.groups.iter().find_map(|g| *g) {
            return EffectivePolicy {
                enabled,
                source: PolicySource::Group,
            };
        }
        if let Some(enabled) = self.global {
            return EffectivePolicy {
                enabled,
                source: PolicySource::GlobalDb,
            };
        }
        EffectivePolicy {
            enabled: env_default,
            source: PolicySource::EnvDefault,
        }
    }
}

/// Resolves the auto-apply policy from persisted overrides
pub struct AutoApplyResolver {
    overrides: OverrideStore,
    catalog: Arc<dyn StackCatalog>,
    inventory: Arc<dyn Inventory>,
    env_default: bool,
}

impl AutoApplyResolver {
    pub fn new(
        overrides: OverrideStore,
        catalog: Arc<dyn StackCatalog>,
        inventory: Arc<dyn Inventory>,
        env_default: bool,
    ) -> Self {
        Self {
            overrides,
            catalog,
            inventory,
            env_default,
        }
    }

    pub fn env_default(&self) -> bool {
        self.env_default
    }

    /// Effective policy for a stack, read fresh from the store
    pub async fn effective(&self, stack_id: i64) -> Result<EffectivePolicy, OrchError> {
        let stack = self.catalog.resolve(stack_id).await?;
        self.effective_for(&stack).await
    }

    pub async fn effective_for(&self, stack: &Stack) -> Result<EffectivePolicy, OrchError> {
        let levels = self.load_levels(stack).await?;
        Ok(levels.resolve(self.env_default))
    }

    async fn load_levels(&self, stack: &Stack) -> Result<PolicyLevels, OrchError> {
        let mut levels = PolicyLevels {
            stack: self.overrides.get(&OverrideScope::Stack(stack.id)).await?,
            ..Default::default()
        };

        match stack.scope_kind {
            ScopeKind::Host => {
                levels.host = self
                    .overrides
                    .get(&OverrideScope::Host(stack.scope_name.clone()))
                    .await?;
                if levels.host.is_none() {
                    // A stack whose host left the inventory still resolves
                    // through the global levels.
                    let mut groups = match self.inventory.get_host(&stack.scope_name).await {
                        Ok(host) => host.groups,
                        Err(OrchError::NotFound(_)) => Vec::new(),
                        Err(e) => return Err(e),
                    };
                    groups.sort();
                    for group in groups {
                        levels
                            .groups
                            .push(self.overrides.get(&OverrideScope::Group(group)).await?);
                    }
                }
            }
            ScopeKind::Group => {
                levels.groups.push(
                    self.overrides
                        .get(&OverrideScope::Group(stack.scope_name.clone()))
                        .await?,
                );
            }
        }

        levels.global = self.overrides.get(&OverrideScope::Global).await?;
        Ok(levels)
    }
}
