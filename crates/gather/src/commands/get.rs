//! `get` and `get-path`: resolve keys through the catalog's batchers.

use gather_core::{Catalog, FetchError, Key, KeyKind};
use tracing::debug;

use crate::cli::{GetArgs, GetPathArgs, GlobalOpts};
use crate::error::CliError;
use crate::output::{self, KeyOutcome};

pub async fn by_ids(args: GetArgs, catalog: &Catalog, global: &GlobalOpts) -> Result<(), CliError> {
    let keys: Vec<Key> = args.ids.into_iter().map(Key::Id).collect();
    resolve(catalog, &args.resource, KeyKind::Id, keys, global).await
}

pub async fn by_paths(
    args: GetPathArgs,
    catalog: &Catalog,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let keys: Vec<Key> = args.paths.iter().map(|p| Key::parse_path(p)).collect();
    resolve(catalog, &args.resource, KeyKind::Path, keys, global).await
}

/// Request every key in one window, print outcomes in request order, and
/// report failures through the exit code.
async fn resolve(
    catalog: &Catalog,
    resource: &str,
    kind: KeyKind,
    keys: Vec<Key>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    debug!(resource, ?kind, count = keys.len(), "resolving keys");
    let results = catalog.get_all(resource, kind, keys.iter().cloned()).await;

    let outcomes: Vec<KeyOutcome<'_>> = keys
        .iter()
        .zip(&results)
        .map(|(key, result)| KeyOutcome::new(key, result))
        .collect();
    output::print_output(&output::render_outcomes(global.output, &outcomes)?)?;

    let total = results.len();
    let not_found = results
        .iter()
        .filter(|r| matches!(r, Err(FetchError::NotFound { .. })))
        .count();
    let failed = results.iter().filter(|r| r.is_err()).count() - not_found;

    if failed > 0 {
        return Err(CliError::FetchFailed {
            resource: resource.into(),
            count: failed,
            total,
        });
    }
    if not_found > 0 {
        return Err(CliError::NotFound {
            resource: resource.into(),
            count: not_found,
            total,
        });
    }
    Ok(())
}
