//! JSON has no representation for +-infinity, which Polymarket-style
//! open-ended brackets ("52 or higher") use as `max_temp`/`min_temp`. This
//! serializes those as the strings `"+inf"`/`"-inf"` instead of letting
//! `serde_json` reject the value outright.

use serde::Serializer;

pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if value.is_infinite() {
        serializer.serialize_str(if *value > 0.0 { "+inf" } else { "-inf" })
    } else {
        serializer.serialize_f64(*value)
    }
}
