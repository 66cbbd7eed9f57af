/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Annotation driven fault injection.
//!
//! A failpoint is armed by a sandbox annotation whose value is a sequence of
//! terms joined by `->`, each term being `[count*]action[(arg)]`:
//!
//! - `off` does nothing
//! - `error(msg)` fails the call with `msg`
//! - `delay(millis)` sleeps, then lets the call through
//!
//! A term without a count applies forever. A term with a count applies that
//! many times before moving on to the next one. Once every term is used up
//! the failpoint is off. `1*error(boom)->delay(10)` fails the first call and
//! slows down every later one.
//!
//! Failpoint progress is tracked per logical sandbox and operation, so a
//! retried creation of the same sandbox sees where the previous attempt left
//! off.

use super::{
    ClientError, NetworkHandle, NetworkProvisioner, ProcessGroupController,
    ProcessGroupHandle, SandboxRecord,
};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Annotation prefix arming network provisioner failpoints. Suffixed with
/// `setup`, `teardown` or `inspect`.
pub const NETWORK_FAILPOINT_PREFIX: &str = "failpoint.network.aurae.io/";

/// Annotation prefix arming process group failpoints. Suffixed with `Start`,
/// `Delete` or `Inspect`.
pub const PROCESS_GROUP_FAILPOINT_PREFIX: &str =
    "io.aurae.sandbox.shim.failpoint.";

const TERM_SEPARATOR: &str = "->";

/// Failpoints a client tracks before used up ones are forgotten. A forgotten
/// failpoint is armed again if its annotation shows up again.
const MAX_TRACKED_FAILPOINTS: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FailpointError {
    #[error("failpoint term '{term}' is empty")]
    EmptyTerm { term: String },
    #[error("failpoint term '{term}' has an invalid count")]
    InvalidCount { term: String },
    #[error("failpoint term '{term}' has an unknown action '{action}'")]
    UnknownAction { term: String, action: String },
    #[error("failpoint term '{term}' has an invalid argument")]
    InvalidArgument { term: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailpointAction {
    Off,
    Error(String),
    Delay(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FailpointTerm {
    remaining: Option<u64>,
    action: FailpointAction,
}

impl FromStr for FailpointTerm {
    type Err = FailpointError;

    fn from_str(term: &str) -> Result<Self, Self::Err> {
        let trimmed = term.trim();
        if trimmed.is_empty() {
            return Err(FailpointError::EmptyTerm { term: term.into() });
        }

        // a `*` inside the argument is not a count separator
        let call_start = trimmed.find('(').unwrap_or(trimmed.len());
        let (remaining, call) = match trimmed[..call_start].find('*') {
            Some(idx) => {
                let count = trimmed[..idx].trim().parse::<u64>().map_err(|_| {
                    FailpointError::InvalidCount { term: term.into() }
                })?;
                (Some(count), trimmed[idx + 1..].trim())
            }
            None => (None, trimmed),
        };

        let (name, arg) = match call.find('(') {
            Some(open) => {
                let Some(arg) = call[open + 1..].strip_suffix(')') else {
                    return Err(FailpointError::InvalidArgument {
                        term: term.into(),
                    });
                };
                (call[..open].trim(), Some(arg))
            }
            None => (call, None),
        };

        let action = match (name, arg) {
            ("off", None) => FailpointAction::Off,
            ("error", arg) => FailpointAction::Error(
                arg.filter(|a| !a.is_empty()).unwrap_or("error").to_string(),
            ),
            ("delay", Some(millis)) => {
                let millis = millis.trim().parse::<u64>().map_err(|_| {
                    FailpointError::InvalidArgument { term: term.into() }
                })?;
                FailpointAction::Delay(Duration::from_millis(millis))
            }
            ("off", Some(_)) | ("delay", None) => {
                return Err(FailpointError::InvalidArgument {
                    term: term.into(),
                })
            }
            (other, _) => {
                return Err(FailpointError::UnknownAction {
                    term: term.into(),
                    action: other.into(),
                })
            }
        };

        Ok(Self { remaining, action })
    }
}

/// A parsed failpoint with its evaluation progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failpoint {
    terms: VecDeque<FailpointTerm>,
}

impl FromStr for Failpoint {
    type Err = FailpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let terms = s
            .split(TERM_SEPARATOR)
            .map(str::parse)
            .collect::<Result<VecDeque<_>, _>>()?;
        Ok(Self { terms })
    }
}

impl Failpoint {
    /// Consume one evaluation.
    pub fn evaluate(&mut self) -> FailpointAction {
        while let Some(term) = self.terms.front_mut() {
            match &mut term.remaining {
                Some(0) => {
                    let _ = self.terms.pop_front();
                }
                Some(n) => {
                    *n -= 1;
                    return term.action.clone();
                }
                None => return term.action.clone(),
            }
        }
        FailpointAction::Off
    }

    /// Whether every later evaluation is [FailpointAction::Off].
    pub fn is_exhausted(&self) -> bool {
        self.terms.iter().all(|term| {
            term.remaining == Some(0) || term.action == FailpointAction::Off
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FailpointKey {
    sandbox: String,
    name: &'static str,
    definition: String,
}

/// Evaluation state of every failpoint a client has seen.
#[derive(Debug)]
struct FailpointRegistry {
    prefix: &'static str,
    capacity: usize,
    failpoints: Mutex<HashMap<FailpointKey, Failpoint>>,
}

impl FailpointRegistry {
    fn new(prefix: &'static str) -> Self {
        Self::with_capacity(prefix, MAX_TRACKED_FAILPOINTS)
    }

    fn with_capacity(prefix: &'static str, capacity: usize) -> Self {
        Self { prefix, capacity, failpoints: Default::default() }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.failpoints.lock().map(|fps| fps.len()).unwrap_or_default()
    }

    fn action(
        &self,
        sandbox: &SandboxRecord,
        name: &'static str,
    ) -> Result<FailpointAction, ClientError> {
        let annotation = format!("{}{name}", self.prefix);
        let Some(definition) = sandbox.annotations.get(&annotation) else {
            return Ok(FailpointAction::Off);
        };

        let key = FailpointKey {
            sandbox: sandbox.key().to_string(),
            name,
            definition: definition.clone(),
        };

        let mut failpoints =
            self.failpoints.lock().unwrap_or_else(|poison| poison.into_inner());

        if failpoints.len() >= self.capacity && !failpoints.contains_key(&key) {
            failpoints.retain(|_, failpoint| !failpoint.is_exhausted());
        }

        let failpoint = match failpoints.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let failpoint = definition.parse::<Failpoint>().map_err(|e| {
                    ClientError::Failed {
                        operation: "failpoint",
                        message: format!("{annotation}: {e}"),
                    }
                })?;
                entry.insert(failpoint)
            }
        };

        Ok(failpoint.evaluate())
    }

    async fn trigger(
        &self,
        sandbox: &SandboxRecord,
        name: &'static str,
        operation: &'static str,
    ) -> Result<(), ClientError> {
        match self.action(sandbox, name)? {
            FailpointAction::Off => Ok(()),
            FailpointAction::Error(message) => {
                info!("failpoint {name} failing sandbox {}", sandbox.id);
                Err(ClientError::Injected { operation, message })
            }
            FailpointAction::Delay(delay) => {
                info!(
                    "failpoint {name} delaying sandbox {} by {delay:?}",
                    sandbox.id
                );
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

/// Wraps a [NetworkProvisioner], injecting failures requested through
/// [NETWORK_FAILPOINT_PREFIX] annotations.
#[derive(Debug)]
pub struct FailpointNetworkProvisioner<N> {
    inner: N,
    failpoints: FailpointRegistry,
}

impl<N> FailpointNetworkProvisioner<N> {
    pub fn new(inner: N) -> Self {
        warn!("network failpoints are enabled");
        Self {
            inner,
            failpoints: FailpointRegistry::new(NETWORK_FAILPOINT_PREFIX),
        }
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }
}

#[tonic::async_trait]
impl<N: NetworkProvisioner> NetworkProvisioner for FailpointNetworkProvisioner<N> {
    async fn setup(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<NetworkHandle, ClientError> {
        self.failpoints.trigger(sandbox, "setup", "network setup").await?;
        self.inner.setup(sandbox).await
    }

    async fn teardown(&self, sandbox: &SandboxRecord) -> Result<(), ClientError> {
        self.failpoints.trigger(sandbox, "teardown", "network teardown").await?;
        self.inner.teardown(sandbox).await
    }

    async fn inspect(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<Option<PathBuf>, ClientError> {
        self.failpoints.trigger(sandbox, "inspect", "network inspect").await?;
        self.inner.inspect(sandbox).await
    }
}

/// Wraps a [ProcessGroupController], injecting failures requested through
/// [PROCESS_GROUP_FAILPOINT_PREFIX] annotations.
#[derive(Debug)]
pub struct FailpointProcessGroup<P> {
    inner: P,
    failpoints: FailpointRegistry,
}

impl<P> FailpointProcessGroup<P> {
    pub fn new(inner: P) -> Self {
        warn!("process group failpoints are enabled");
        Self {
            inner,
            failpoints: FailpointRegistry::new(PROCESS_GROUP_FAILPOINT_PREFIX),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[tonic::async_trait]
impl<P: ProcessGroupController> ProcessGroupController for FailpointProcessGroup<P> {
    async fn start(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<ProcessGroupHandle, ClientError> {
        self.failpoints.trigger(sandbox, "Start", "process group start").await?;
        self.inner.start(sandbox).await
    }

    async fn delete(&self, sandbox: &SandboxRecord) -> Result<(), ClientError> {
        self.failpoints.trigger(sandbox, "Delete", "process group delete").await?;
        self.inner.delete(sandbox).await
    }

    async fn inspect(
        &self,
        sandbox: &SandboxRecord,
    ) -> Result<Option<ProcessGroupHandle>, ClientError> {
        self.failpoints.trigger(sandbox, "Inspect", "process group inspect").await?;
        self.inner.inspect(sandbox).await
    }
}
