//! Line parser for app-install records.
//!
//! Input lines carry five tab-separated fields:
//! `device_type, device_id, lat, lon, app_id[,app_id...]`.
//!
//! Structural problems (missing fields, empty identity) reject the line.
//! Numeric problems never do: bad app ids are filtered out and bad
//! coordinates fall back to `0.0`, both with a warning.

use tracing::warn;

/// Number of tab-separated fields a record line must carry.
pub const RECORD_FIELDS: usize = 5;

/// One parsed app-install record.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub device_type: String,
    pub device_id: String,
    pub lat: f64,
    pub lon: f64,
    pub apps: Vec<u32>,
}

impl Record {
    /// Store key for this record: `{device_type}:{device_id}`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.device_type, self.device_id)
    }
}

/// Parse one raw line. Returns `None` for structurally malformed lines.
///
/// Only the line terminator is stripped before splitting; tabs at either end
/// still delimit (possibly empty) fields.
pub fn parse_line(line: &str) -> Option<Record> {
    let line = line.trim_end_matches(['\r', '\n']);
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < RECORD_FIELDS {
        return None;
    }
    let device_type = parts[0].trim();
    let device_id = parts[1].trim();
    if device_type.is_empty() || device_id.is_empty() {
        return None;
    }

    let apps = match parse_apps_strict(parts[4]) {
        Some(apps) => apps,
        None => {
            warn!(line, "not all user apps are digits");
            parse_apps_lenient(parts[4])
        }
    };

    // Coordinates are a pair; a half-parsed pair is as useless as none.
    let (lat, lon) = match (parts[2].trim().parse::<f64>(), parts[3].trim().parse::<f64>()) {
        (Ok(lat), Ok(lon)) => (lat, lon),
        _ => {
            warn!(line, "invalid geo coords");
            (0.0, 0.0)
        }
    };

    Some(Record {
        device_type: device_type.to_string(),
        device_id: device_id.to_string(),
        lat,
        lon,
        apps,
    })
}

fn parse_apps_strict(raw: &str) -> Option<Vec<u32>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }
    raw.split(',')
        .map(|token| token.trim().parse::<u32>().ok())
        .collect()
}

fn parse_apps_lenient(raw: &str) -> Vec<u32> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|token| token.parse::<u32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let record = parse_line("idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23\n")
            .expect("record");
        assert_eq!(record.device_type, "idfa");
        assert_eq!(record.device_id, "1rfw452y52g2gq4g");
        assert_eq!(record.lat, 55.55);
        assert_eq!(record.lon, 42.42);
        assert_eq!(record.apps, vec![1423, 43, 567, 3, 7, 23]);
        assert_eq!(record.key(), "idfa:1rfw452y52g2gq4g");
    }

    #[test]
    fn short_lines_are_rejected() {
        assert!(parse_line("").is_none());
        assert!(parse_line("idfa\tabc\t1.0\t2.0").is_none());
        assert!(parse_line("idfa").is_none());
    }

    #[test]
    fn empty_identity_is_rejected() {
        assert!(parse_line("\tabc\t1.0\t2.0\t1,2").is_none());
        // An empty leading field must not shift the rest into place.
        assert!(parse_line("\tidfa\tX\t1\t2\t3").is_none());
        assert!(parse_line("idfa\t\t1.0\t2.0\t1,2").is_none());
        assert!(parse_line("idfa\t  \t1.0\t2.0\t1,2").is_none());
        assert!(parse_line(" \t \t1.0\t2.0\t1,2").is_none());
    }

    #[test]
    fn extra_fields_are_ignored() {
        let record = parse_line("gaid\tdev\t1.5\t2.5\t7,8\textra\tmore").expect("record");
        assert_eq!(record.apps, vec![7, 8]);
        assert_eq!(record.lat, 1.5);
    }

    #[test]
    fn non_digit_app_tokens_are_dropped() {
        let record = parse_line("idfa\tdev\t1.0\t2.0\t12,x,7").expect("record");
        assert_eq!(record.apps, vec![12, 7]);

        let record = parse_line("idfa\tdev\t1.0\t2.0\t-3,4, 5 ,99999999999").expect("record");
        assert_eq!(record.apps, vec![4, 5]);
    }

    #[test]
    fn empty_apps_field_yields_empty_list() {
        let record = parse_line("adid\tdev\t1.0\t2.0\t").expect("record");
        assert!(record.apps.is_empty());
        assert_eq!(record.lat, 1.0);

        let record = parse_line("adid\tdev\t1.0\t2.0\t\r\n").expect("record with crlf");
        assert!(record.apps.is_empty());

        let record = parse_line("adid\tdev\t1.0\t2.0\t,").expect("record");
        assert!(record.apps.is_empty());
    }

    #[test]
    fn bad_coordinates_default_to_zero() {
        let record = parse_line("idfa\tdev\tnotanumber\t42.42\t1,2").expect("record");
        assert_eq!(record.lat, 0.0);
        assert_eq!(record.lon, 0.0);
        assert_eq!(record.apps, vec![1, 2]);
    }
}
