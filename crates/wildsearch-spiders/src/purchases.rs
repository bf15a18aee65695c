//! Purchase counts embedded in the inline scripts of product pages.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::jsobject::extract_call_argument;

/// Legacy product bundle, `data.nomenclatures[id].ordersCount`
pub const DOM_READY_MARKER: &str = "wb.product.DomReady.init";
/// Current single page bundle, `router.ssrModel.selectedNomenclature.ordersCount`
pub const SPA_MARKER: &str = "wb.spa.init";

/// Reads the purchase count of product `wb_id` from a page script.
///
/// The legacy bundle is keyed by product id and is only read when `wb_id` is
/// known. `Ok(None)` when the script has neither marker or when the expected
/// path is missing. A marker that is not followed by a readable object is an
/// error.
pub fn purchases_count(script: &str, wb_id: Option<&str>) -> Result<Option<u64>> {
    if let Some(wb_id) = wb_id {
        if let Some(init) = extract_call_argument(script, DOM_READY_MARKER)
            .with_context(|| format!("Unreadable {DOM_READY_MARKER} data"))?
        {
            if let Some(count) = dom_ready_count(&init, wb_id) {
                return Ok(Some(count));
            }
        }
    }

    if let Some(init) = extract_call_argument(script, SPA_MARKER)
        .with_context(|| format!("Unreadable {SPA_MARKER} data"))?
    {
        return Ok(spa_count(&init));
    }

    Ok(None)
}

fn dom_ready_count(init: &Value, wb_id: &str) -> Option<u64> {
    let nomenclatures = init
        .pointer("/data/nomenclatures")
        .or_else(|| init.get("nomenclatures"))?;
    as_count(nomenclatures.get(wb_id)?.get("ordersCount")?)
}

fn spa_count(init: &Value) -> Option<u64> {
    as_count(init.pointer("/router/ssrModel/selectedNomenclature/ordersCount")?)
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => crate::extract::parse_count(s),
        _ => None,
    }
}
