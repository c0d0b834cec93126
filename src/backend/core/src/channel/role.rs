//! Role descriptors bound by channels.
//!
//! Every role names the component instance that plays it, the component
//! type it belongs to (`component`, may be empty when unknown) and the
//! event, operation or property it binds.

use serde::{Deserialize, Serialize};

use crate::container::InstanceId;

macro_rules! role_common {
    ($($role:ident),+ $(,)?) => {
        $(
            impl $role {
                pub fn instance(&self) -> &InstanceId {
                    &self.instance
                }

                /// Attach the component type identifier carried on the wire.
                pub fn with_component(mut self, component: impl Into<String>) -> Self {
                    self.component = component.into();
                    self
                }
            }
        )+
    };
}

/// Emits an event into a Link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Publisher {
    pub instance: InstanceId,
    #[serde(default)]
    pub component: String,
    pub event: String,
}

impl Publisher {
    pub fn new(instance: impl Into<InstanceId>, event: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            component: String::new(),
            event: event.into(),
        }
    }
}

/// Publisher that expects a reply on `callback`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requestor {
    pub instance: InstanceId,
    #[serde(default)]
    pub component: String,
    pub event: String,
    pub callback: String,
}

impl Requestor {
    pub fn new(instance: impl Into<InstanceId>, event: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            component: String::new(),
            event: event.into(),
            callback: callback.into(),
        }
    }
}

/// What a subscriber binds on its component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberTarget {
    Operation(String),
    /// Run `operation` and mirror the body into `property`
    Property { operation: String, property: String },
}

impl SubscriberTarget {
    pub fn operation(&self) -> &str {
        match self {
            SubscriberTarget::Operation(op) => op,
            SubscriberTarget::Property { operation, .. } => operation,
        }
    }

    pub fn property(&self) -> Option<&str> {
        match self {
            SubscriberTarget::Operation(_) => None,
            SubscriberTarget::Property { property, .. } => Some(property),
        }
    }
}

impl std::fmt::Display for SubscriberTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriberTarget::Operation(op) => f.write_str(op),
            SubscriberTarget::Property { operation, property } => write!(f, "{}#{}", operation, property),
        }
    }
}

/// Receives Link deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscriber {
    pub instance: InstanceId,
    #[serde(default)]
    pub component: String,
    pub target: SubscriberTarget,
}

impl Subscriber {
    pub fn operation(instance: impl Into<InstanceId>, operation: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            component: String::new(),
            target: SubscriberTarget::Operation(operation.into()),
        }
    }

    pub fn property(instance: impl Into<InstanceId>, operation: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            component: String::new(),
            target: SubscriberTarget::Property {
                operation: operation.into(),
                property: property.into(),
            },
        }
    }
}

/// Subscriber of a BackLink that answers with `return_event`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replier {
    pub instance: InstanceId,
    #[serde(default)]
    pub component: String,
    pub operation: String,
    pub return_event: String,
}

impl Replier {
    pub fn new(instance: impl Into<InstanceId>, operation: impl Into<String>, return_event: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            component: String::new(),
            operation: operation.into(),
            return_event: return_event.into(),
        }
    }
}

/// Both ends of a PropertyLink. Publishes changes of `property` and
/// receives peers' changes through `operation`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub instance: InstanceId,
    #[serde(default)]
    pub component: String,
    pub property: String,
    pub operation: String,
}

impl Participant {
    pub fn new(instance: impl Into<InstanceId>, property: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            component: String::new(),
            property: property.into(),
            operation: operation.into(),
        }
    }
}

role_common!(Publisher, Requestor, Subscriber, Replier, Participant);
