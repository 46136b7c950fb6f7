//! # Config Prefabs for Well-Known Model Configurations
//!
//! A prefab is a named model config, with an optional directory of
//! pretrained weights that fit it.
//!
//! ```text
//! name 1:1 PreFab
//! PreFab 1:N PretrainedWeights
//! ```

use crate::cache::weights::{
    PretrainedWeightsDescriptor, PretrainedWeightsMap, StaticPretrainedWeightsMap,
};
use anyhow::bail;
use burn::config::Config;
use std::fmt::Debug;
use std::sync::Arc;

/// Static builder for a [`PreFabConfig`]
pub struct StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the model config pre-fab.
    pub name: &'static str,

    /// Description of the model config pre-fab.
    pub description: &'static str,

    /// Builder function for the config.
    pub builder: fn() -> C,

    /// Pretrained weights which fit the config.
    pub weights: Option<&'static StaticPretrainedWeightsMap<'static>>,
}

impl<C> StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Convert to a [`PreFabConfig<C>`].
    pub fn to_prefab(&self) -> PreFabConfig<C> {
        let builder = self.builder;
        PreFabConfig {
            name: self.name.to_string(),
            description: self.description.to_string(),
            builder: Arc::new(builder),
            weights: self.weights.map(|w| w.to_directory()),
        }
    }
}

impl<C> From<&StaticPreFabConfig<C>> for PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn from(config: &StaticPreFabConfig<C>) -> Self {
        config.to_prefab()
    }
}

impl<C> Debug for StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        self.to_prefab().fmt(f)
    }
}

/// A [`Config`] Well-Known Pre-Fab.
pub struct PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the model config pre-fab.
    pub name: String,

    /// Description of the model config pre-fab.
    pub description: String,

    /// Builder function for the config.
    pub builder: Arc<dyn Fn() -> C + Send + Sync>,

    /// Pretrained weights which fit the config.
    pub weights: Option<PretrainedWeightsMap>,
}

impl<C> Clone for PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            builder: self.builder.clone(),
            weights: self.weights.clone(),
        }
    }
}

impl<C> Debug for PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let pretty = f.alternate();

        let type_name = std::any::type_name::<C>();
        let mut handle = f.debug_struct(&format!("PreFabConfig<{}>", type_name));

        handle
            .field("name", &self.name)
            .field("description", &self.description);

        if pretty {
            handle.field("config", &self.to_config());
        }

        handle.field(
            "weights",
            &self
                .weights
                .as_ref()
                .map(|w| w.items.keys().cloned().collect::<Vec<_>>()),
        );

        handle.finish()
    }
}

impl<C> PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Build a new config.
    pub fn to_config(&self) -> C {
        (self.builder)()
    }

    /// Lookup pretrained weights by name.
    pub fn lookup_pretrained_weights(
        &self,
        name: &str,
    ) -> Option<PretrainedWeightsDescriptor> {
        self.weights.as_ref()?.lookup_by_name(name)
    }

    /// Lookup pretrained weights by name.
    pub fn try_lookup_pretrained_weights(
        &self,
        name: &str,
    ) -> anyhow::Result<PretrainedWeightsDescriptor> {
        match self.lookup_pretrained_weights(name) {
            Some(d) => Ok(d),
            None => bail!(
                "Pretrained weights \"{}\" not found for prefab \"{}\"",
                name,
                self.name
            ),
        }
    }

    /// Lookup pretrained weights by name.
    pub fn expect_lookup_pretrained_weights(
        &self,
        name: &str,
    ) -> PretrainedWeightsDescriptor {
        match self.try_lookup_pretrained_weights(name) {
            Ok(d) => d,
            Err(e) => panic!("{}", e),
        }
    }

    /// The first (default) pretrained weights, by name order.
    pub fn default_pretrained_weights(&self) -> Option<PretrainedWeightsDescriptor> {
        self.weights.as_ref()?.items.values().next().cloned()
    }
}

/// A static, named directory of [`StaticPreFabConfig`]s.
pub struct StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the map.
    pub name: &'static str,

    /// Description of the map.
    pub description: &'static str,

    /// The prefabs.
    pub items: &'static [&'static StaticPreFabConfig<C>],
}

impl<C> StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// The prefab names, in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|item| item.name).collect()
    }

    /// Lookup a prefab by name.
    pub fn lookup_prefab(
        &self,
        name: &str,
    ) -> Option<PreFabConfig<C>> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.to_prefab())
    }

    /// Lookup a prefab by name.
    pub fn try_lookup_prefab(
        &self,
        name: &str,
    ) -> anyhow::Result<PreFabConfig<C>> {
        match self.lookup_prefab(name) {
            Some(prefab) => Ok(prefab),
            None => bail!(
                "Prefab \"{}\" not found in \"{}\"; known: {:?}",
                name,
                self.name,
                self.names()
            ),
        }
    }

    /// Lookup a prefab by name.
    pub fn expect_lookup_prefab(
        &self,
        name: &str,
    ) -> PreFabConfig<C> {
        match self.try_lookup_prefab(name) {
            Ok(prefab) => prefab,
            Err(e) => panic!("{}", e),
        }
    }
}

impl<C> Debug for StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StaticPreFabMap")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("items", &self.names())
            .finish()
    }
}
