//! ---
//! twin_section: "04-telemetry"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Line-protocol body serialization."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::fmt::Write as _;

use crate::types::{FieldValue, TelemetryBatch};

/// Significant digits used for the timestamp.
pub const TIMESTAMP_PRECISION: usize = 6;
/// Significant digits used for real-valued fields.
pub const REAL_PRECISION: usize = 16;

/// Render `value` the way C `printf("%.<precision>g")` does.
pub fn format_g(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let precision = precision.max(1);
    let scientific = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };
    if exponent >= -4 && exponent < precision as i32 {
        let decimals = (precision as i32 - 1 - exponent) as usize;
        strip_trailing_zeros(&format!("{:.*}", decimals, value)).to_owned()
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{}{:02}",
            strip_trailing_zeros(mantissa),
            sign,
            exponent.unsigned_abs()
        )
    }
}

fn strip_trailing_zeros(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Remove spaces and turn commas into periods; everything else is kept.
pub fn sanitize_field_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != ' ')
        .map(|c| if c == ',' { '.' } else { c })
        .collect()
}

fn write_value(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Real(value) => out.push_str(&format_g(*value, REAL_PRECISION)),
        FieldValue::Integer(value) => {
            let _ = write!(out, "{}", value);
        }
        FieldValue::Boolean(value) => out.push_str(if *value { "true" } else { "false" }),
        FieldValue::Text(value) => {
            out.push('"');
            for c in value.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
    }
}

/// Serializes batches for one measurement.
#[derive(Debug, Clone)]
pub struct LineSerializer {
    measurement: String,
}

impl LineSerializer {
    /// `measurement` is written verbatim.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
        }
    }

    /// Measurement name heading every line.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// `<measurement>,global_id=<run> timestamp=<t>[,<field>=<value>]*\n`
    pub fn serialize(&self, batch: &TelemetryBatch) -> String {
        let mut line = String::with_capacity(64 + batch.fields.len() * 32);
        let _ = write!(
            line,
            "{},global_id={} timestamp={}",
            self.measurement,
            batch.run_id,
            format_g(batch.timestamp, TIMESTAMP_PRECISION)
        );
        for field in &batch.fields {
            line.push(',');
            line.push_str(&sanitize_field_name(&field.name));
            line.push('=');
            write_value(&mut line, &field.value);
        }
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_g_matches_printf_default_precision() {
        let cases = [
            (0.0, "0"),
            (-0.0, "-0"),
            (0.5, "0.5"),
            (1.0, "1"),
            (0.1 + 0.2, "0.3"),
            (1e-5, "1e-05"),
            (0.0001, "0.0001"),
            (123456789.0, "1.23457e+08"),
            (100000.0, "100000"),
            (1e6, "1e+06"),
            (9.9999999, "10"),
            (1e300, "1e+300"),
        ];
        for (value, expected) in cases {
            assert_eq!(format_g(value, TIMESTAMP_PRECISION), expected, "value {value:?}");
        }
    }

    #[test]
    fn format_g_with_sixteen_digits() {
        assert_eq!(format_g(1.0 / 3.0, 16), "0.3333333333333333");
        assert_eq!(format_g(0.1 * 3.0, 16), "0.3");
        assert_eq!(format_g(9.9999999, 16), "9.999999900000001");
        assert_eq!(format_g(123456789.0, 16), "123456789");
        assert_eq!(format_g(123456789012345678.0, 16), "1.234567890123457e+17");
        assert_eq!(format_g(9.900000000000001e-05, 16), "9.900000000000001e-05");
    }

    #[test]
    fn sanitize_replaces_commas_and_drops_spaces_only() {
        assert_eq!(sanitize_field_name("a, b c"), "a.bc");
        assert_eq!(sanitize_field_name("der(h)"), "der(h)");
        assert_eq!(sanitize_field_name("x[1,2].y"), "x[1.2].y");
        assert_eq!(sanitize_field_name("\tkeep=\"me\""), "\tkeep=\"me\"");
    }

    #[test]
    fn serializes_fields_in_order() {
        let serializer = LineSerializer::new("bouncingBall.fmu");
        let mut batch = TelemetryBatch::new(7, 0.5);
        batch.push("in put", FieldValue::Real(0.7));
        batch.push("count", FieldValue::Integer(-3));
        batch.push("on", FieldValue::Boolean(true));
        batch.push("label", FieldValue::Text("say \"hi\"\\".into()));
        assert_eq!(
            serializer.serialize(&batch),
            "bouncingBall.fmu,global_id=7 timestamp=0.5,input=0.7,count=-3,on=true,label=\"say \\\"hi\\\"\\\\\"\n"
        );
    }

    #[test]
    fn empty_batch_has_no_trailing_separator() {
        let serializer = LineSerializer::new("m.fmu");
        let batch = TelemetryBatch::new(1, 0.0);
        assert_eq!(serializer.serialize(&batch), "m.fmu,global_id=1 timestamp=0\n");
    }
}
