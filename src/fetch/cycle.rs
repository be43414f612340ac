//! Usage: One token-acquisition-and-fetch cycle with a supersession guard.
//!
//! A cycle runs whenever the active account changes. New triggers supersede
//! in-flight work instead of queueing behind it: each run takes a fresh
//! generation from an atomic counter and a run whose generation is stale by
//! the time it finishes reports `Superseded`, so stale responses never reach
//! the UI state.

use crate::auth::session::{RedirectFlow, Session};
use crate::domain::accounts::Account;
use crate::fetch::classify::{call_endpoint, EndpointOutcome};
use crate::fetch::state::{self, EndpointReport, UiState};
use crate::infra::settings::EndpointConfig;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub enum CycleResult {
    Completed(UiState),
    Superseded,
}

#[derive(Default)]
pub struct CycleRunner {
    generation: AtomicU64,
}

impl CycleRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one acquisition cycle for `account`. Prior error state never leaks
    /// in: the produced `UiState` is rebuilt from scratch and consumers
    /// replace their state wholesale on `Completed`.
    pub async fn run(
        &self,
        session: &Session,
        flow: &dyn RedirectFlow,
        account: &Account,
    ) -> CycleResult {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let request = session.token_request(account.id);

        let grant = match session.acquire_token_silent(&request).await {
            Ok(grant) => grant,
            Err(silent_err) => {
                tracing::debug!(
                    account_id = account.id,
                    error = %silent_err,
                    "silent acquisition failed; falling back to interactive redirect"
                );
                match session.acquire_token_interactive(flow, &request).await {
                    Ok(grant) => grant,
                    Err(interactive_err) => {
                        tracing::warn!(
                            account_id = account.id,
                            error = %interactive_err,
                            "interactive acquisition failed; cycle ends with terminal error"
                        );
                        return self.finish(
                            generation,
                            UiState::token_acquisition_failed(&account.display_name),
                        );
                    }
                }
            }
        };

        let reports = fetch_all(
            session.http(),
            &session.config().endpoints,
            &grant.access_token,
        )
        .await;
        self.finish(generation, state::reduce(&account.display_name, &reports))
    }

    fn finish(&self, generation: u64, state: UiState) -> CycleResult {
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(generation, "cycle superseded; discarding its outcomes");
            return CycleResult::Superseded;
        }
        CycleResult::Completed(state)
    }
}

/// Issue one authorized GET per endpoint concurrently; collect outcomes in
/// endpoint declaration order so reduction stays order-independent of the
/// network.
async fn fetch_all(
    client: &reqwest::Client,
    endpoints: &[EndpointConfig],
    access_token: &str,
) -> Vec<EndpointReport> {
    let handles: Vec<_> = endpoints
        .iter()
        .map(|endpoint| {
            let client = client.clone();
            let url = endpoint.url.clone();
            let token = access_token.to_string();
            (
                endpoint.name.clone(),
                endpoint.signals_elevated,
                tokio::spawn(async move { call_endpoint(&client, &url, &token).await }),
            )
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for (name, signals_elevated, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => EndpointOutcome::Failure(format!("endpoint task failed: {join_err}")),
        };
        tracing::debug!(endpoint = %name, ?outcome, "endpoint classified");
        reports.push(EndpointReport {
            name,
            signals_elevated,
            outcome,
        });
    }
    reports
}
