use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::KennelSize;

/// Default kennel layout for a brand-new facility: two of each size,
/// numbered K001 through K008. Callers only invoke this on an empty engine.
pub async fn seed_default_kennels(engine: &Engine) -> Result<(), EngineError> {
    let layout = [
        ("K001", KennelSize::Small),
        ("K002", KennelSize::Small),
        ("K003", KennelSize::Medium),
        ("K004", KennelSize::Medium),
        ("K005", KennelSize::Large),
        ("K006", KennelSize::Large),
        ("K007", KennelSize::ExtraLarge),
        ("K008", KennelSize::ExtraLarge),
    ];
    for (number, size) in layout {
        engine
            .create_kennel(Ulid::new(), number.into(), size, None)
            .await?;
    }
    info!("seeded {} default kennels", layout.len());
    Ok(())
}
