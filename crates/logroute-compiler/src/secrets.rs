//! Secret injection for one pass
//!
//! The injector is created at the start of a pass and consumed at its end.
//! Identical references share one mount binding. In dry-run mode lookups are
//! checked but nothing is recorded and no value leaves the store.

use std::collections::BTreeMap;

use tracing::debug;

use logroute_common::crd::SecretKeySelector;
use logroute_plugin::{ParamKind, ParamValue, PluginInstance, SecretParam};

/// Read access to secret data
pub trait SecretStore {
    /// Decoded data of a secret, if present
    fn secret_data(&self, namespace: &str, name: &str) -> Option<&BTreeMap<String, String>>;
}

/// Fully qualified secret key
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretReference {
    /// Namespace of the secret
    pub namespace: String,
    /// Secret name
    pub name: String,
    /// Key within the secret
    pub key: String,
}

impl SecretReference {
    /// Qualify a selector with the namespace of the referencing object
    pub fn new(namespace: impl Into<String>, selector: &SecretKeySelector) -> Self {
        Self {
            namespace: namespace.into(),
            name: selector.name.clone(),
            key: selector.key.clone(),
        }
    }

    /// File name used when the secret is mounted
    ///
    /// Namespace and secret names never contain `_`, so distinct references
    /// give distinct names.
    pub fn mount_key(&self) -> String {
        format!("{}_{}_{}", self.namespace, self.name, self.key)
    }
}

/// How a renderer wants a secret delivered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretDelivery {
    /// Value written into the configuration
    Inline,
    /// Value mounted as a file, path written into the configuration
    Mount,
}

/// Outcome of a resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedSecret {
    /// The secret value
    Inline(String),
    /// Where the value will be mounted
    Mount(String),
    /// Dry run: the secret exists, nothing was materialised
    Checked,
}

/// A file the deployment must mount for the rendered configuration
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MountBinding {
    /// Source secret key
    pub reference: SecretReference,
    /// File name within the secret directory
    pub mount_key: String,
    /// Absolute path of the mounted file
    pub path: String,
}

/// Secret lookup failure
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    /// The secret does not exist
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound {
        /// Namespace searched
        namespace: String,
        /// Secret name
        name: String,
    },

    /// The secret exists but lacks the key
    #[error("key {key} not found in secret {namespace}/{name}")]
    KeyNotFound {
        /// Namespace searched
        namespace: String,
        /// Secret name
        name: String,
        /// Missing key
        key: String,
    },

    /// Another reference is already mounted at the same path
    #[error("secret {namespace}/{name} key {key} would be mounted at {path}, already used by {existing}")]
    MountConflict {
        /// Namespace of the rejected reference
        namespace: String,
        /// Secret name of the rejected reference
        name: String,
        /// Key of the rejected reference
        key: String,
        /// Contested path
        path: String,
        /// Reference holding the path, as `namespace/name/key`
        existing: String,
    },
}

/// Whether the injector materialises secrets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InjectionMode {
    /// Record bindings and inline values
    Committing,
    /// Only check that referenced secrets exist
    DryRun,
}

/// Per-pass secret resolver
pub struct SecretInjector<'a, S: SecretStore + ?Sized> {
    store: &'a S,
    secret_dir: &'a str,
    mode: InjectionMode,
    bindings: BTreeMap<SecretReference, MountBinding>,
}

impl<'a, S: SecretStore + ?Sized> SecretInjector<'a, S> {
    /// Injector that records bindings
    pub fn committing(store: &'a S, secret_dir: &'a str) -> Self {
        Self::new(store, secret_dir, InjectionMode::Committing)
    }

    /// Injector that only checks
    pub fn dry_run(store: &'a S, secret_dir: &'a str) -> Self {
        Self::new(store, secret_dir, InjectionMode::DryRun)
    }

    /// Injector in the given mode
    pub fn new(store: &'a S, secret_dir: &'a str, mode: InjectionMode) -> Self {
        Self {
            store,
            secret_dir,
            mode,
            bindings: BTreeMap::new(),
        }
    }

    /// Resolve one reference
    pub fn resolve(
        &mut self,
        reference: &SecretReference,
        delivery: SecretDelivery,
    ) -> Result<ResolvedSecret, SecretError> {
        let data = self
            .store
            .secret_data(&reference.namespace, &reference.name)
            .ok_or_else(|| SecretError::SecretNotFound {
                namespace: reference.namespace.clone(),
                name: reference.name.clone(),
            })?;
        let value = data
            .get(&reference.key)
            .ok_or_else(|| SecretError::KeyNotFound {
                namespace: reference.namespace.clone(),
                name: reference.name.clone(),
                key: reference.key.clone(),
            })?;

        if self.mode == InjectionMode::DryRun {
            return Ok(ResolvedSecret::Checked);
        }

        match delivery {
            SecretDelivery::Inline => Ok(ResolvedSecret::Inline(value.clone())),
            SecretDelivery::Mount => {
                if let Some(binding) = self.bindings.get(reference) {
                    return Ok(ResolvedSecret::Mount(binding.path.clone()));
                }

                let secret_dir = self.secret_dir.trim_end_matches('/');
                let mount_key = reference.mount_key();
                let path = format!("{secret_dir}/{mount_key}");
                if let Some(taken) = self.bindings.values().find(|b| b.path == path) {
                    let existing = &taken.reference;
                    return Err(SecretError::MountConflict {
                        namespace: reference.namespace.clone(),
                        name: reference.name.clone(),
                        key: reference.key.clone(),
                        path,
                        existing: format!(
                            "{}/{}/{}",
                            existing.namespace, existing.name, existing.key
                        ),
                    });
                }

                self.bindings.insert(
                    reference.clone(),
                    MountBinding {
                        reference: reference.clone(),
                        mount_key,
                        path: path.clone(),
                    },
                );
                Ok(ResolvedSecret::Mount(path))
            }
        }
    }

    /// Resolve every secret reference of an instance in place
    ///
    /// `policy` picks the delivery per parameter kind. References that cannot
    /// be resolved stay in place and are returned as errors.
    pub fn inject(
        &mut self,
        instance: &mut PluginInstance,
        namespace: &str,
        policy: impl Fn(ParamKind) -> SecretDelivery,
    ) -> Vec<SecretError> {
        let mut errors = Vec::new();
        for param in instance.secret_params_mut() {
            let ParamValue::Secret(SecretParam::Reference(selector)) = &param.value else {
                continue;
            };
            let reference = SecretReference::new(namespace, selector);
            match self.resolve(&reference, policy(param.kind)) {
                Ok(ResolvedSecret::Inline(value)) => {
                    param.value = ParamValue::Secret(SecretParam::Inline(value))
                }
                Ok(ResolvedSecret::Mount(path)) => {
                    param.value = ParamValue::Secret(SecretParam::Mount(path))
                }
                Ok(ResolvedSecret::Checked) => {}
                Err(e) => {
                    debug!(
                        namespace = %reference.namespace,
                        secret = %reference.name,
                        error = %e,
                        "secret lookup failed"
                    );
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Consume the injector, yielding the mount bindings in reference order
    pub fn finish(self) -> Vec<MountBinding> {
        self.bindings.into_values().collect()
    }
}
