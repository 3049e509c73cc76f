//! Injection of the in-page extraction library.
//!
//! The library registers itself for every new document via
//! `addInitScript`, and [`ensure_injected`] re-establishes it for pages
//! that were created before the interpreter attached (probe, then direct
//! evaluation). Injection is best-effort: a page that refuses the probe
//! still gets the init-script registration so later documents are covered.

pub mod js;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::driver::{Driver, DriverError, DriverResult};

pub use js::LIBRARY;

/// How long the presence probe may take before we assume the library is
/// missing.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Register the library for all future documents on this page.
pub async fn inject(driver: &Arc<dyn Driver>) -> DriverResult<()> {
    driver.add_init_script(LIBRARY).await
}

/// Make sure the current document exposes the extraction globals.
///
/// Probes for `window.scrape`; when the probe fails or times out the
/// library is evaluated directly into the live document and the
/// init-script registration is attempted regardless, per the
/// `ScriptInjectionTimeout` policy.
pub async fn ensure_injected(driver: &Arc<dyn Driver>) -> DriverResult<()> {
    let probe = driver
        .evaluate("typeof window.scrape === 'function'", PROBE_TIMEOUT)
        .await;

    match probe {
        Ok(value) if value.as_bool() == Some(true) => {
            debug!("in-page library already present");
            return Ok(());
        }
        Ok(_) => debug!("in-page library missing, injecting"),
        Err(DriverError::EvaluationTimeout(_)) => {
            warn!("in-page library probe timed out, injecting anyway");
        }
        Err(e) => return Err(e),
    }

    driver.evaluate(LIBRARY, Duration::from_secs(10)).await?;
    if let Err(e) = driver.add_init_script(LIBRARY).await {
        warn!("failed to register init script: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_installs_every_public_global() {
        for global in [
            "window.scrape",
            "window.scrapeSchema",
            "window.scrapeList",
            "window.scrapeListAuto",
            "window.scrollDown",
            "window.scrollUp",
            "window.__scrapeflow",
        ] {
            assert!(
                LIBRARY.contains(&format!("{global} =")),
                "library does not install {global}"
            );
        }
    }
}
