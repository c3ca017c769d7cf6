//! Compensating transactions over non-transactional resources
//!
//! The new state is applied before the guarded body runs and is visible to
//! everyone from then on. If the body fails, the prior state is written back
//! on a best-effort basis and the body's error is returned unchanged.

use std::fmt;
use std::future::Future;
use tracing::{debug, error, warn};

/// Apply a change, run `body`, and undo the change if `body` fails
///
/// `apply` returns whatever `undo` needs to revert it (the prior state, the
/// id of a created resource). A failing `apply` changed nothing, so its error
/// is returned without calling `undo`. A failing `undo` is logged and
/// swallowed.
pub async fn with_compensation<V, A, AFut, U, UFut, UE, B, BFut, R, E>(
    label: &str,
    apply: A,
    undo: U,
    body: B,
) -> Result<R, E>
where
    A: FnOnce() -> AFut,
    AFut: Future<Output = Result<V, E>>,
    U: FnOnce(V) -> UFut,
    UFut: Future<Output = Result<(), UE>>,
    UE: fmt::Display,
    B: FnOnce() -> BFut,
    BFut: Future<Output = Result<R, E>>,
    E: fmt::Display,
{
    let undo_token = apply().await?;
    debug!(resource = label, "Applied new state");

    match body().await {
        Ok(value) => Ok(value),
        Err(err) => {
            warn!(resource = label, error = %err, "Operation failed, rolling back");
            if let Err(undo_err) = undo(undo_token).await {
                error!(
                    resource = label,
                    error = %undo_err,
                    "Rollback failed; resource left in its new state"
                );
            }
            Err(err)
        }
    }
}

/// Read and write access to the state of one external resource
pub trait StateAccessor: Send + Sync {
    type State: Clone + Send + Sync;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Human-readable name of the resource, used in logs
    fn describe(&self) -> String;

    fn read(&self) -> impl Future<Output = Result<Self::State, Self::Error>> + Send;

    fn write(&self, state: Self::State) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Set `accessor` to `new_state` for the duration of `body`, restoring the
/// prior state if `body` fails
pub async fn with_state_compensation<S, B, BFut, R, E>(
    accessor: &S,
    new_state: S::State,
    body: B,
) -> Result<R, E>
where
    S: StateAccessor,
    B: FnOnce() -> BFut,
    BFut: Future<Output = Result<R, E>>,
    E: From<S::Error> + fmt::Display,
{
    let label = accessor.describe();
    let prior = accessor.read().await?;

    with_compensation(
        &label,
        || async move {
            accessor.write(new_state).await.map_err(E::from)?;
            Ok::<_, E>(prior)
        },
        |prior| accessor.write(prior),
        body,
    )
    .await
}
