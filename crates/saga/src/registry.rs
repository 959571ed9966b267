//! Typed registry that rebuilds activity instances from persisted definitions.

use std::collections::HashMap;
use std::fmt;

use crate::activity::{Activity, Configurable};
use crate::error::{Result, SagaError};
use crate::state::ActivityDefinition;

type Constructor<D> =
    Box<dyn Fn(Option<&serde_json::Value>) -> Result<Box<dyn Activity<D>>> + Send + Sync>;

/// Maps stable activity type tags to factories.
///
/// Each registration declares up front whether the activity takes a
/// configuration value and of which type, so rehydration never has to
/// guess at runtime.
pub struct ActivityRegistry<D> {
    constructors: HashMap<String, Constructor<D>>,
}

impl<D> fmt::Debug for ActivityRegistry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("ActivityRegistry")
            .field("activity_types", &tags)
            .finish()
    }
}

impl<D: 'static> Default for ActivityRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: 'static> ActivityRegistry<D> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers an activity that takes no configuration.
    pub fn register<A, F>(&mut self, activity_type: impl Into<String>, factory: F)
    where
        A: Activity<D> + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        let activity_type = activity_type.into();
        let tag = activity_type.clone();
        self.insert(
            activity_type,
            Box::new(move |config| {
                if config.is_some() {
                    return Err(SagaError::ConfigNotAccepted(tag.clone()));
                }
                Ok(Box::new(factory()) as Box<dyn Activity<D>>)
            }),
        );
    }

    /// Registers an activity whose definitions may carry an `A::Config`.
    ///
    /// A definition without configuration gets the factory's defaults.
    pub fn register_configurable<A, F>(&mut self, activity_type: impl Into<String>, factory: F)
    where
        A: Activity<D> + Configurable + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        let activity_type = activity_type.into();
        let tag = activity_type.clone();
        self.insert(
            activity_type,
            Box::new(move |config| {
                let mut activity = factory();
                if let Some(value) = config {
                    let config = serde_json::from_value::<A::Config>(value.clone()).map_err(
                        |source| SagaError::InvalidActivityConfig {
                            activity_type: tag.clone(),
                            source,
                        },
                    )?;
                    activity.configure(config);
                }
                Ok(Box::new(activity) as Box<dyn Activity<D>>)
            }),
        );
    }

    fn insert(&mut self, activity_type: String, constructor: Constructor<D>) {
        if self
            .constructors
            .insert(activity_type.clone(), constructor)
            .is_some()
        {
            tracing::debug!(%activity_type, "activity factory replaced");
        }
    }

    /// Returns true if a factory is registered under the tag.
    pub fn contains(&self, activity_type: &str) -> bool {
        self.constructors.contains_key(activity_type)
    }

    /// Returns the registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Returns the number of registered activity types.
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Builds a fresh, configured instance for one definition.
    pub fn instantiate(&self, definition: &ActivityDefinition) -> Result<Box<dyn Activity<D>>> {
        let constructor = self
            .constructors
            .get(&definition.activity_type)
            .ok_or_else(|| SagaError::UnknownActivityType(definition.activity_type.clone()))?;
        constructor(definition.config.as_ref())
    }

    /// Builds one instance per definition, in order.
    pub fn rehydrate(
        &self,
        definitions: &[ActivityDefinition],
    ) -> Result<Vec<Box<dyn Activity<D>>>> {
        definitions
            .iter()
            .map(|definition| self.instantiate(definition))
            .collect()
    }
}
