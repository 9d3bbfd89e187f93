// Remote value container model
//
// Turns opaque remote-object handles into lazily-expandable variable lists.
// Containers form a closed sum type: plain property expansion, call-frame
// scopes with synthetic entries, and a fabricated container for thrown
// primitives that have no handle at all.

use crate::error::{AdapterError, AdapterResult};
use async_trait::async_trait;
use inspector_client::{CallFrameId, PropertyDescriptor, RemoteObject, RemoteObjectId};
use std::collections::HashMap;

/// Whether a property name counts as an array index.
///
/// Deliberately lenient: leading whitespace, a sign, and trailing garbage
/// after the digits are all accepted ("-1" and "03x" are indexed, "x3" is
/// not). Matches the numeric parse the protocol front ends use; do not
/// tighten to a round-trip integer check.
pub fn is_indexed_prop_name(name: &str) -> bool {
    let rest = name.trim_start();
    let rest = rest
        .strip_prefix('-')
        .or_else(|| rest.strip_prefix('+'))
        .unwrap_or(rest);
    rest.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Property filter recognized by the variables request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyFilter {
    #[default]
    All,
    Named,
    Indexed,
}

impl PropertyFilter {
    pub fn parse(filter: Option<&str>) -> AdapterResult<Self> {
        match filter {
            None | Some("all") => Ok(Self::All),
            Some("named") => Ok(Self::Named),
            Some("indexed") => Ok(Self::Indexed),
            Some(other) => Err(AdapterError::InvalidArguments(format!(
                "unrecognized variables filter '{other}'"
            ))),
        }
    }

    fn accepts(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Indexed => is_indexed_prop_name(name),
            Self::Named => !is_indexed_prop_name(name),
        }
    }
}

/// Seam to the instrumentation protocol, mockable in tests
#[async_trait]
pub trait InspectorBackend: Send + Sync {
    /// Fetch own properties of a handle, optionally windowed
    async fn fetch_properties(
        &self,
        handle: &RemoteObjectId,
        start: Option<usize>,
        count: Option<usize>,
    ) -> AdapterResult<Vec<PropertyDescriptor>>;

    /// Assign a property of a handle; returns the now-current value
    async fn assign_property(
        &self,
        handle: &RemoteObjectId,
        name: &str,
        value_expression: &str,
    ) -> AdapterResult<RemoteObject>;

    /// Assign a variable in a call-frame scope; addresses the frame and the
    /// scope's original index within the frame's scope list
    async fn assign_scope_variable(
        &self,
        call_frame_id: &CallFrameId,
        scope_index: usize,
        name: &str,
        value_expression: &str,
    ) -> AdapterResult<RemoteObject>;

    /// Evaluate an expression, against a paused frame when one is given
    async fn evaluate(
        &self,
        expression: &str,
        call_frame_id: Option<&CallFrameId>,
    ) -> AdapterResult<RemoteObject>;
}

/// One client-visible variable: a name and the remote value behind it. The
/// value's object id, when present, is the handle for further expansion.
#[derive(Debug, Clone)]
pub struct VariableEntry {
    pub name: String,
    pub value: RemoteObject,
}

/// Expands the properties of one remote object handle
#[derive(Debug, Clone)]
pub struct PropertiesContainer {
    pub handle: RemoteObjectId,
}

/// Expands a call-frame scope, with synthetic `this` / return-value entries
/// supplied at construction rather than fetched from the handle
#[derive(Debug, Clone)]
pub struct ScopeContainer {
    pub handle: RemoteObjectId,
    pub call_frame_id: CallFrameId,
    /// The scope's index in the frame's original scope list. The
    /// client-visible list may be filtered, but mutation must address the
    /// underlying frame/scope pair.
    pub scope_index: usize,
    pub this_binding: Option<RemoteObject>,
    pub return_value: Option<RemoteObject>,
}

/// Stands in for a thrown primitive that has no object handle
#[derive(Debug, Clone)]
pub struct ExceptionValueContainer {
    pub value: RemoteObject,
}

#[derive(Debug, Clone)]
pub enum VariableContainer {
    Properties(PropertiesContainer),
    Scope(ScopeContainer),
    ExceptionValue(ExceptionValueContainer),
}

impl VariableContainer {
    pub fn properties(handle: RemoteObjectId) -> Self {
        Self::Properties(PropertiesContainer { handle })
    }

    /// Container for a thrown value: property expansion when the exception
    /// is a real object, a fabricated single entry when it is a primitive.
    pub fn for_exception(thrown: RemoteObject) -> Self {
        match thrown.object_id.clone() {
            Some(handle) => Self::Properties(PropertiesContainer { handle }),
            None => Self::ExceptionValue(ExceptionValueContainer { value: thrown }),
        }
    }

    /// The handle this container wraps, if any
    pub fn handle(&self) -> Option<&RemoteObjectId> {
        match self {
            Self::Properties(c) => Some(&c.handle),
            Self::Scope(c) => Some(&c.handle),
            Self::ExceptionValue(_) => None,
        }
    }

    /// Expand into an ordered variable list. Synthetic entries always come
    /// before handle-derived ones.
    pub async fn expand(
        &self,
        backend: &dyn InspectorBackend,
        filter: PropertyFilter,
        start: Option<usize>,
        count: Option<usize>,
    ) -> AdapterResult<Vec<VariableEntry>> {
        match self {
            Self::Properties(container) => {
                let properties = backend
                    .fetch_properties(&container.handle, start, count)
                    .await?;
                Ok(descriptors_to_entries(properties, filter))
            }
            Self::Scope(container) => {
                // Scopes are small: always fetch everything, no filter
                let properties = backend
                    .fetch_properties(&container.handle, None, None)
                    .await?;
                let mut entries = Vec::with_capacity(properties.len() + 2);
                if let Some(this_binding) = &container.this_binding {
                    entries.push(VariableEntry {
                        name: "this".to_string(),
                        value: this_binding.clone(),
                    });
                }
                if let Some(return_value) = &container.return_value {
                    entries.push(VariableEntry {
                        name: "Return value".to_string(),
                        value: return_value.clone(),
                    });
                }
                entries.extend(descriptors_to_entries(properties, PropertyFilter::All));
                Ok(entries)
            }
            Self::ExceptionValue(container) => Ok(vec![VariableEntry {
                name: "Exception".to_string(),
                value: container.value.clone(),
            }]),
        }
    }

    /// Assign a new value to a named member of this container. Returns a
    /// string rendering of the now-current value.
    pub async fn set_value(
        &self,
        backend: &dyn InspectorBackend,
        name: &str,
        value_expression: &str,
    ) -> AdapterResult<String> {
        match self {
            Self::Properties(container) => {
                let value = backend
                    .assign_property(&container.handle, name, value_expression)
                    .await?;
                Ok(value.preview_string())
            }
            Self::Scope(container) => {
                let value = backend
                    .assign_scope_variable(
                        &container.call_frame_id,
                        container.scope_index,
                        name,
                        value_expression,
                    )
                    .await?;
                Ok(value.preview_string())
            }
            Self::ExceptionValue(_) => Err(AdapterError::Evaluation(
                "a thrown primitive cannot be assigned to".to_string(),
            )),
        }
    }
}

fn descriptors_to_entries(
    properties: Vec<PropertyDescriptor>,
    filter: PropertyFilter,
) -> Vec<VariableEntry> {
    properties
        .into_iter()
        .filter(|p| filter.accepts(&p.name))
        .map(|p| VariableEntry {
            value: p.value.unwrap_or_default(),
            name: p.name,
        })
        .collect()
}

/// Issues variables references and owns the containers behind them. Scoped
/// to the connected state; cleared whenever the target resumes, since the
/// handles die with the pause that produced them.
#[derive(Default)]
pub struct VariableRegistry {
    next_reference: i64,
    containers: HashMap<i64, VariableContainer>,
    by_handle: HashMap<RemoteObjectId, i64>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self {
            next_reference: 1,
            containers: HashMap::new(),
            by_handle: HashMap::new(),
        }
    }

    /// Register a container, returning its variables reference. Re-registering
    /// a plain property container for a known handle returns the existing
    /// reference.
    pub fn register(&mut self, container: VariableContainer) -> i64 {
        if let VariableContainer::Properties(properties) = &container {
            if let Some(reference) = self.by_handle.get(&properties.handle) {
                return *reference;
            }
        }

        let reference = self.next_reference;
        self.next_reference += 1;

        if let VariableContainer::Properties(properties) = &container {
            self.by_handle.insert(properties.handle.clone(), reference);
        }
        self.containers.insert(reference, container);
        reference
    }

    pub fn get(&self, reference: i64) -> AdapterResult<&VariableContainer> {
        self.containers
            .get(&reference)
            .ok_or(AdapterError::UnknownVariablesReference(reference))
    }

    pub fn clear(&mut self) {
        self.containers.clear();
        self.by_handle.clear();
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}
