//! General utilities.

use chrono::{DateTime, TimeZone, Utc};

use crate::value::{Value, ValueMap};

/// Copies every dictionary level of `map`, sharing list values.
///
/// The result owns fresh dictionaries at every depth, but lists below the top
/// level point at the same storage as in `map`.
pub fn shallow_copy_nested_dict(map: &ValueMap) -> ValueMap {
    map.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Dict(inner) => Value::Dict(shallow_copy_nested_dict(inner)),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Formats a timestamp as `YYYY-MM-DD HH:MM:SS`.
pub fn format_time<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Describes how long ago `time` was, e.g. `3 hours ago`.
pub fn relative_time<Tz: TimeZone>(time: &DateTime<Tz>) -> String {
    relative_time_since(time, Utc::now())
}

/// Describes the interval from `time` to `now`, e.g. `3 hours ago`.
pub fn relative_time_since<Tz: TimeZone>(time: &DateTime<Tz>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(time.with_timezone(&Utc));
    let seconds = elapsed.num_seconds().max(0);
    let (count, unit) = match seconds {
        0..60 => (seconds, "second"),
        60..3_600 => (seconds / 60, "minute"),
        3_600..86_400 => (seconds / 3_600, "hour"),
        _ => (seconds / 86_400, "day"),
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{count} {unit}{plural} ago")
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use chrono::{Duration, FixedOffset};
    use rstest::rstest;

    use super::*;

    #[test]
    fn nested_dicts_are_copied_and_lists_shared() {
        let shared = Value::list([1, 2]);
        let original = ValueMap::from_iter([(
            "a".to_string(),
            Value::dict([("b", shared.clone())]),
        )]);
        let copied = shallow_copy_nested_dict(&original);
        assert_eq!(copied, original);

        let (Value::List(shared), Value::List(copied_list)) =
            (&shared, &copied["a"].as_dict().unwrap()["b"])
        else {
            panic!("expected lists");
        };
        assert!(Rc::ptr_eq(shared, copied_list));
    }

    #[test]
    fn format_time_is_timezone_local() {
        let utc = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(format_time(&utc), "2024-01-01 12:00:00");

        let offset = FixedOffset::east_opt(3_600).unwrap();
        assert_eq!(format_time(&utc.with_timezone(&offset)), "2024-01-01 13:00:00");
    }

    #[rstest]
    #[case::seconds(Duration::seconds(5), "5 seconds ago")]
    #[case::one_minute(Duration::seconds(61), "1 minute ago")]
    #[case::minutes(Duration::minutes(2), "2 minutes ago")]
    #[case::hours(Duration::hours(3), "3 hours ago")]
    #[case::days(Duration::days(4), "4 days ago")]
    fn relative_time_picks_the_largest_unit(#[case] delta: Duration, #[case] expected: &str) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(relative_time_since(&(now - delta), now), expected);
    }

    #[test]
    fn relative_time_uses_the_clock() {
        let label = relative_time(&(Utc::now() - Duration::hours(3)));
        assert!(label.contains("hour"), "{label}");
    }
}
