//! Executes a plan against a provider, recording progress in state.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures_util::future::join_all;
use indicatif::ProgressBar;

use crate::engine::graph::ResourceGraph;
use crate::engine::plan::{Action, Plan};
use crate::engine::resource::{Address, ResourceKind};
use crate::image::{DockerBuilder, ImageArtifact};
use crate::provider::{resolve_value, Attributes, Provider, ProviderError, ResolvedResource};
use crate::state::snapshot::{ResourceState, StateSnapshot, StateStore};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(attempts: u32) -> Self {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    log::warn!(
                        "{what}: {e}; retrying in {delay:?} (attempt {attempt}/{})",
                        self.attempts
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub address: Address,
    pub action: Action,
    pub error: ProviderError,
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: Vec<(Address, Action)>,
    /// Set when the apply halted. Everything in `applied` stays recorded.
    pub failure: Option<Failure>,
    pub outputs: BTreeMap<String, String>,
}

impl ApplyReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

struct Outcome {
    id: String,
    attributes: Attributes,
    /// Previous identity to retire once dependents have moved on.
    retired: Option<(ResourceKind, String)>,
    /// Remote reference and the artifact pushed to it.
    pushed: Option<(String, ImageArtifact)>,
}

pub struct Engine<'a, P: Provider> {
    provider: &'a P,
    store: &'a StateStore,
    retry: RetryPolicy,
    builder: Option<DockerBuilder>,
    progress: Option<ProgressBar>,
}

impl<'a, P: Provider> Engine<'a, P> {
    pub fn new(provider: &'a P, store: &'a StateStore) -> Self {
        Engine {
            provider,
            store,
            retry: RetryPolicy::default(),
            builder: None,
            progress: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build and push images with docker before registering them.
    pub fn with_builder(mut self, builder: DockerBuilder) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    fn status(&self, message: String) {
        match &self.progress {
            Some(progress) => progress.set_message(message),
            None => log::debug!("{message}"),
        }
    }

    async fn delete(&self, kind: ResourceKind, id: &str, what: &str) -> Result<(), ProviderError> {
        match self.retry.run(what, || self.provider.delete(kind, id)).await {
            Err(ProviderError::NotFound { .. }) => {
                log::debug!("{what}: already gone");
                Ok(())
            }
            other => other,
        }
    }

    async fn push_image(
        &self,
        resolved: &ResolvedResource,
        state: &StateSnapshot,
        images: &BTreeMap<String, ImageArtifact>,
    ) -> Result<Option<(String, ImageArtifact)>, ProviderError> {
        let Some(builder) = &self.builder else {
            return Ok(None);
        };
        let artifact = images
            .get(&resolved.address.name)
            .ok_or_else(|| ProviderError::Rejected(format!("no build for {}", resolved.address)))?;
        let url = resolved.str_prop("repository_url").unwrap_or_default();
        let remote = artifact
            .remote_reference(url)
            .map_err(|e| ProviderError::Rejected(format!("{e:#}")))?
            .to_string();
        // Same content under another repository still has to be pushed there.
        if state.images.contains_key(&remote) {
            log::info!("{remote} is already pushed");
            return Ok(None);
        }
        let remote = builder
            .build_and_push(artifact, url)
            .await
            .map_err(|e| ProviderError::Rejected(format!("{e:#}")))?;
        Ok(Some((remote, artifact.clone())))
    }

    async fn execute(
        &self,
        address: &Address,
        action: Action,
        graph: &ResourceGraph,
        state: &StateSnapshot,
        images: &BTreeMap<String, ImageArtifact>,
    ) -> Result<Outcome, ProviderError> {
        let resource = graph
            .get(address)
            .ok_or_else(|| ProviderError::Rejected(format!("{address} is not declared")))?;
        let resolved = ResolvedResource {
            address: address.clone(),
            properties: resolve_value(&resource.properties, state)?,
            fingerprint: resource.fingerprint(),
        };
        let what = format!("{action} {address}");

        let pushed = if address.kind == ResourceKind::Image && action != Action::Update {
            self.push_image(&resolved, state, images).await?
        } else {
            None
        };

        let recorded = state.resources.get(address);
        match (action, recorded) {
            (Action::Update, Some(recorded)) => {
                match self
                    .retry
                    .run(&what, || self.provider.update(&recorded.id, &resolved))
                    .await
                {
                    Ok(attributes) => Ok(Outcome {
                        id: recorded.id.clone(),
                        attributes,
                        retired: None,
                        pushed,
                    }),
                    Err(ProviderError::NotFound { .. }) => {
                        log::warn!("{address} vanished, creating it again");
                        let (id, attributes) =
                            self.retry.run(&what, || self.provider.create(&resolved)).await?;
                        Ok(Outcome {
                            id,
                            attributes,
                            retired: None,
                            pushed,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            _ => {
                let (id, attributes) =
                    self.retry.run(&what, || self.provider.create(&resolved)).await?;
                let retired = match (action, recorded) {
                    (Action::Replace, Some(recorded)) => Some((recorded.kind, recorded.id.clone())),
                    _ => None,
                };
                Ok(Outcome {
                    id,
                    attributes,
                    retired,
                    pushed,
                })
            }
        }
    }

    /// Apply `plan`. Only state persistence failures are returned as errors;
    /// provider failures halt the run and are reported in the result.
    pub async fn apply(
        &self,
        graph: &ResourceGraph,
        plan: &Plan,
        state: &mut StateSnapshot,
        images: &BTreeMap<String, ImageArtifact>,
    ) -> Result<ApplyReport> {
        self.store.ensure_current(state)?;
        let mut report = ApplyReport::default();

        for change in plan.deletes() {
            let Some(recorded) = state.resources.get(&change.address) else {
                continue;
            };
            self.status(format!("Deleting {}", change.address));
            let what = format!("delete {}", change.address);
            let (kind, id) = (recorded.kind, recorded.id.clone());
            match self.delete(kind, &id, &what).await {
                Ok(()) => {
                    log::info!("Deleted {} ({id})", change.address);
                    state.resources.remove(&change.address);
                    report.applied.push((change.address.clone(), Action::Delete));
                }
                Err(error) => {
                    report.failure = Some(Failure {
                        address: change.address.clone(),
                        action: Action::Delete,
                        error,
                    });
                    self.store.save(state)?;
                    return Ok(report);
                }
            }
        }
        if plan.deletes().next().is_some() {
            self.store.save(state)?;
        }

        let mut retired = Vec::new();
        let waves = plan.waves(graph)?;
        for (index, wave) in waves.iter().enumerate() {
            self.status(format!(
                "Wave {}/{}: {}",
                index + 1,
                waves.len(),
                wave.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
            ));

            let results = {
                let snapshot: &StateSnapshot = state;
                join_all(wave.iter().map(|address| async move {
                    let action = plan
                        .get(address)
                        .map(|c| c.action)
                        .unwrap_or(Action::Create);
                    let result = self.execute(address, action, graph, snapshot, images).await;
                    (address.clone(), action, result)
                }))
                .await
            };

            // The whole wave settles before a failure halts the run.
            for (address, action, result) in results {
                match result {
                    Ok(outcome) => {
                        let resource = graph.get(&address);
                        let now = Utc::now();
                        let created_at = match (action, state.resources.get(&address)) {
                            (Action::Update, Some(previous)) => previous.created_at,
                            _ => now,
                        };
                        state.resources.insert(
                            address.clone(),
                            ResourceState {
                                kind: address.kind,
                                id: outcome.id.clone(),
                                properties: resource
                                    .map(|r| r.properties.clone())
                                    .unwrap_or_default(),
                                fingerprint: resource.map(|r| r.fingerprint()).unwrap_or_default(),
                                attributes: outcome.attributes,
                                dependencies: resource
                                    .map(|r| r.dependencies.clone())
                                    .unwrap_or_default(),
                                created_at,
                                updated_at: now,
                            },
                        );
                        if let Some((remote, artifact)) = outcome.pushed {
                            state.images.insert(remote, artifact);
                        }
                        if let Some(old) = outcome.retired {
                            retired.push((address.clone(), old));
                        }
                        log::info!("{} {address} ({})", past_tense(action), outcome.id);
                        report.applied.push((address, action));
                    }
                    Err(error) => {
                        log::error!("{action} {address} failed: {error}");
                        if report.failure.is_none() {
                            report.failure = Some(Failure {
                                address,
                                action,
                                error,
                            });
                        }
                    }
                }
            }

            self.store.save(state)?;
            if report.failure.is_some() {
                return Ok(report);
            }
        }

        // Old copies of replaced resources go last, newest dependents first.
        for (address, (kind, id)) in retired.into_iter().rev() {
            self.status(format!("Retiring previous {address}"));
            let what = format!("delete previous {address} ({id})");
            if let Err(error) = self.delete(kind, &id, &what).await {
                report.failure = Some(Failure {
                    address,
                    action: Action::Replace,
                    error,
                });
                self.store.save(state)?;
                return Ok(report);
            }
        }

        state.outputs = evaluate_outputs(graph, state);
        report.outputs = state.outputs.clone();
        self.store.save(state)?;
        Ok(report)
    }
}

fn past_tense(action: Action) -> &'static str {
    match action {
        Action::Create => "Created",
        Action::Update => "Updated",
        Action::Replace => "Replaced",
        Action::Delete => "Deleted",
    }
}

pub fn evaluate_outputs(graph: &ResourceGraph, state: &StateSnapshot) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::new();
    for (name, reference) in &graph.outputs {
        match state.attribute(reference) {
            Some(value) => {
                outputs.insert(name.clone(), value.to_string());
            }
            None => log::warn!("Output '{name}' refers to {reference}, which has no value"),
        }
    }
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = Cell::new(0);
        let result = RetryPolicy::immediate(3)
            .run("create thing", || {
                calls.set(calls.get() + 1);
                let attempt = calls.get();
                async move {
                    if attempt < 3 {
                        Err(ProviderError::Transient("throttled".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .run("create thing", || {
                calls.set(calls.get() + 1);
                async { Err(ProviderError::Rejected("quota".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn retries_give_up_after_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(2)
            .run("create thing", || {
                calls.set(calls.get() + 1);
                async { Err(ProviderError::Transient("down".into())) }
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Transient(_))));
        assert_eq!(calls.get(), 2);
    }
}
