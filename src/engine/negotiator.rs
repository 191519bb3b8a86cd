//! Version negotiation
//!
//! Brings a database to the declared version before the store is used:
//! open → detect version → upgrade if needed → create or open the container.
//! Both backends implement [`ContainerHost`]; the state machine lives here once.

use super::error::{Result, StoreError};
use super::contract::run_blocking;
use super::logging::SharedLog;

const COMPONENT: &str = "negotiator";

/// Result of asking a host to open its database at a version
pub enum Opened<H, M> {
    /// Opened at the requested version (or, for hosts without versioned
    /// open, at whatever version is stored)
    Ready(H),
    /// The database is absent or older; a mutation phase was granted
    UpgradeNeeded(M),
}

/// Native operations a backend exposes to the negotiator.
///
/// Every method is blocking; the negotiator runs them on the blocking pool.
pub trait ContainerHost: Clone + Send + Sync + 'static {
    type Handle: Send + 'static;
    type Mutation: Send + 'static;

    /// Open the database at `version`. Fails with
    /// [`StoreError::VersionConflict`] when the stored version is newer.
    fn open(&self, version: u32) -> Result<Opened<Self::Handle, Self::Mutation>>;

    fn version(&self, handle: &Self::Handle) -> u32;

    fn has_container(&self, handle: &Self::Handle) -> Result<bool>;

    /// Check that the existing container can be read
    fn confirm(&self, handle: &Self::Handle) -> Result<()>;

    /// Enter the exclusive mutation phase at `version`, giving up `handle`
    fn enter_mutation(&self, handle: Self::Handle, version: u32) -> Result<Self::Mutation>;

    /// Create the container and its indexes when missing
    fn prepare(&self, mutation: &mut Self::Mutation) -> Result<()>;

    fn commit(&self, mutation: Self::Mutation) -> Result<Self::Handle>;
}

/// A store brought to its negotiated version
#[derive(Debug)]
pub struct Negotiated<H> {
    pub handle: H,
    pub version: u32,
    /// Number of open requests issued, retries included
    pub attempts: u32,
}

enum NegotiationState<H, M> {
    Closed,
    Opening(u32),
    VersionChecking(H),
    Upgrading(M),
    Ready(H),
}

impl<H, M> NegotiationState<H, M> {
    fn name(&self) -> &'static str {
        match self {
            NegotiationState::Closed => "closed",
            NegotiationState::Opening(_) => "opening",
            NegotiationState::VersionChecking(_) => "version_checking",
            NegotiationState::Upgrading(_) => "upgrading",
            NegotiationState::Ready(_) => "ready",
        }
    }
}

/// Drive `host` to `requested` (or the first version the host accepts above
/// it) and return the ready handle.
///
/// Version conflicts are retried one version higher with no upper bound: a
/// host that rejects every version keeps this future pending forever. Any
/// other failure ends the negotiation.
pub async fn negotiate<C: ContainerHost>(host: C, requested: u32, log: SharedLog) -> Result<Negotiated<C::Handle>> {
    let mut state: NegotiationState<C::Handle, C::Mutation> = NegotiationState::Closed;
    let mut version = requested;
    let mut attempts = 0u32;
    let mut upgraded = false;

    loop {
        log.debug(COMPONENT, &format!("state {} (version {})", state.name(), version));

        state = match state {
            NegotiationState::Closed => NegotiationState::Opening(version),

            NegotiationState::Opening(target) => {
                attempts += 1;
                let h = host.clone();
                match run_blocking(move || h.open(target)).await {
                    Ok(Opened::Ready(handle)) => NegotiationState::VersionChecking(handle),
                    Ok(Opened::UpgradeNeeded(mutation)) => NegotiationState::Upgrading(mutation),
                    Err(StoreError::VersionConflict { requested, current }) => {
                        log.warn(
                            COMPONENT,
                            &format!("version {} rejected (stored {}), retrying at {}", requested, current, target + 1),
                        );
                        version = target + 1;
                        tokio::task::yield_now().await;
                        NegotiationState::Opening(version)
                    }
                    Err(e) => return Err(fail(&log, e)),
                }
            }

            NegotiationState::VersionChecking(handle) => {
                let current = host.version(&handle);
                if current < version {
                    // Host opened without versioning; set the version explicitly.
                    let h = host.clone();
                    let target = version;
                    let mutation = run_blocking(move || h.enter_mutation(handle, target))
                        .await
                        .map_err(|e| fail(&log, e))?;
                    NegotiationState::Upgrading(mutation)
                } else {
                    if current > version {
                        log.info(COMPONENT, &format!("adopting stored version {} over {}", current, version));
                        version = current;
                    }
                    let h = host.clone();
                    let (handle, present) = run_blocking(move || {
                        let present = h.has_container(&handle)?;
                        Ok((handle, present))
                    })
                    .await
                    .map_err(|e| fail(&log, e))?;

                    if present {
                        let h = host.clone();
                        let handle = run_blocking(move || {
                            h.confirm(&handle)?;
                            Ok(handle)
                        })
                        .await
                        .map_err(|e| fail(&log, e))?;
                        NegotiationState::Ready(handle)
                    } else if upgraded {
                        return Err(fail(
                            &log,
                            StoreError::Blocked("container still missing after upgrade".to_string()),
                        ));
                    } else {
                        version += 1;
                        let h = host.clone();
                        let target = version;
                        let mutation = run_blocking(move || h.enter_mutation(handle, target))
                            .await
                            .map_err(|e| fail(&log, e))?;
                        NegotiationState::Upgrading(mutation)
                    }
                }
            }

            NegotiationState::Upgrading(mut mutation) => {
                let h = host.clone();
                let handle = run_blocking(move || {
                    h.prepare(&mut mutation)?;
                    h.commit(mutation)
                })
                .await
                .map_err(|e| fail(&log, e))?;
                upgraded = true;
                version = host.version(&handle);
                log.info(COMPONENT, &format!("upgraded to version {}", version));
                NegotiationState::VersionChecking(handle)
            }

            NegotiationState::Ready(handle) => {
                log.info(COMPONENT, &format!("ready at version {} after {} attempt(s)", version, attempts));
                return Ok(Negotiated {
                    handle,
                    version,
                    attempts,
                });
            }
        };
    }
}

fn fail(log: &SharedLog, error: StoreError) -> StoreError {
    log.error(COMPONENT, &format!("negotiation failed ({}): {}", error.category(), error));
    error
}
