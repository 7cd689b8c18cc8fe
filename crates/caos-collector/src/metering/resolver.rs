//! Resource resolution
//!
//! Asks the metering store which tracked entities have any data overlapping
//! a window. Overlap, not containment: a VM alive across the whole window
//! has no observation inside a short window but still counts.

use std::collections::BTreeSet;

use caos_common::{CollectorError, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use super::{MeteringStore, TimeRange};

/// Resources of `tenant` that reported `counter_name` overlapping `[start, end]`.
///
/// `end` may only be omitted together with `start`. The unbounded lookup does
/// not guarantee ordering consistency with later observation queries and is
/// logged as such.
#[instrument(skip(store))]
pub async fn find_resources(
    store: &dyn MeteringStore,
    tenant: &str,
    counter_name: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<BTreeSet<String>> {
    let range = match (start, end) {
        (Some(_), None) => {
            return Err(CollectorError::invalid_configuration(
                "resource lookup with a start but no end",
            ))
        }
        (None, None) => {
            warn!(tenant, counter_name, "Unbounded resource lookup cannot ensure query order");
            TimeRange::ever()
        }
        (start, end) => TimeRange { start, end },
    };

    let resources: BTreeSet<String> = store
        .find_resources(tenant, counter_name, range)
        .await?
        .into_iter()
        .collect();

    debug!(
        tenant,
        counter_name,
        count = resources.len(),
        "Resolved resources in range"
    );
    Ok(resources)
}
