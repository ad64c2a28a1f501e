//! Timestamp and duration datasets.
//!
//! Both are stored as signed 64-bit integers: timestamps as milliseconds
//! since the Unix epoch, durations as a count of some [`TimeUnit`]. The
//! meaning travels in the dataset's type variant, which reads check.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rustyhdf5_typemap::{TimeUnit, TypeMapError, TypeVariant};

use crate::error::{AtPath, Error, Result};
use crate::file::H5File;

/// Reads and writes timestamp and duration datasets.
pub struct TimeIo<'f> {
    file: &'f H5File,
}

impl<'f> TimeIo<'f> {
    pub(crate) fn new(file: &'f H5File) -> Self {
        Self { file }
    }

    fn tag(&self, path: &str, variant: TypeVariant) -> Result<()> {
        let scope = self.file.scope();
        let ds = scope.open_dataset(self.file.hid()?, path).at(path)?;
        self.file.write_type_variant(ds, variant, path)
    }

    fn write_raw(&self, path: &str, values: &[i64], scalar: bool, variant: TypeVariant) -> Result<()> {
        let writer = self.file.writer::<i64>();
        match (scalar, values) {
            (true, [value]) => writer.write(path, *value)?,
            _ => writer.write_array(path, values)?,
        }
        self.tag(path, variant)
    }

    /// The stored variant, which must satisfy `accept`.
    fn checked_variant(
        &self,
        path: &str,
        expected: TypeVariant,
        accept: impl Fn(TypeVariant) -> bool,
    ) -> Result<TypeVariant> {
        let found = self.file.type_variant(path)?;
        if accept(found) {
            Ok(found)
        } else {
            Err(Error::WrongTypeVariant {
                path: path.to_string(),
                expected,
                found,
            })
        }
    }

    // ---- timestamps ----

    pub fn write_timestamp(&self, path: &str, time: DateTime<Utc>) -> Result<()> {
        self.write_raw(path, &[time.timestamp_millis()], true, TypeVariant::Timestamp)
    }

    pub fn write_timestamps(&self, path: &str, times: &[DateTime<Utc>]) -> Result<()> {
        let millis: Vec<i64> = times.iter().map(DateTime::timestamp_millis).collect();
        self.write_raw(path, &millis, false, TypeVariant::Timestamp)
    }

    pub fn read_timestamps(&self, path: &str) -> Result<Vec<DateTime<Utc>>> {
        self.checked_variant(path, TypeVariant::Timestamp, |v| v == TypeVariant::Timestamp)?;
        self.file
            .reader::<i64>()
            .read_array(path)?
            .into_iter()
            .map(|ms| {
                Utc.timestamp_millis_opt(ms).single().ok_or_else(|| Error::AtPath {
                    path: path.to_string(),
                    source: TypeMapError::ValueOutOfRange {
                        target: "timestamp".to_string(),
                        value: ms.to_string(),
                    },
                })
            })
            .collect()
    }

    pub fn read_timestamp(&self, path: &str) -> Result<DateTime<Utc>> {
        self.read_timestamps(path)?
            .first()
            .copied()
            .ok_or_else(|| Error::Incompatible {
                path: path.to_string(),
                requested: "one timestamp".to_string(),
                found: "an empty dataset".to_string(),
            })
    }

    // ---- durations ----

    /// Write durations counted in `unit`.
    pub fn write_durations(&self, path: &str, values: &[i64], unit: TimeUnit) -> Result<()> {
        self.write_raw(path, values, false, TypeVariant::Duration(unit))
    }

    pub fn write_duration(&self, path: &str, value: i64, unit: TimeUnit) -> Result<()> {
        self.write_raw(path, &[value], true, TypeVariant::Duration(unit))
    }

    /// Read durations converted into `unit`, truncating toward zero.
    pub fn read_durations(&self, path: &str, unit: TimeUnit) -> Result<Vec<i64>> {
        let stored = self.stored_unit(path, unit)?;
        let values = self.file.reader::<i64>().read_array(path)?;
        if stored == unit {
            return Ok(values);
        }
        log::trace!("'{path}': converting durations from {stored:?} to {unit:?}");
        Ok(values.into_iter().map(|v| stored.convert(v, unit)).collect())
    }

    /// The stored unit of a duration dataset; `requested` is only used in
    /// the error for a dataset that holds no durations.
    pub fn stored_unit(&self, path: &str, requested: TimeUnit) -> Result<TimeUnit> {
        let variant = self.checked_variant(path, TypeVariant::Duration(requested), |v| {
            matches!(v, TypeVariant::Duration(_))
        })?;
        match variant {
            TypeVariant::Duration(unit) => Ok(unit),
            _ => Ok(requested),
        }
    }

    /// Write `deltas` counted in `unit`, truncating toward zero.
    pub fn write_time_deltas(&self, path: &str, deltas: &[TimeDelta], unit: TimeUnit) -> Result<()> {
        let values = deltas
            .iter()
            .map(|d| {
                d.num_microseconds()
                    .map(|us| TimeUnit::Microseconds.convert(us, unit))
                    .ok_or_else(|| Error::AtPath {
                        path: path.to_string(),
                        source: TypeMapError::ValueOutOfRange {
                            target: "duration".to_string(),
                            value: d.to_string(),
                        },
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        self.write_durations(path, &values, unit)
    }

    pub fn read_time_deltas(&self, path: &str) -> Result<Vec<TimeDelta>> {
        Ok(self
            .read_durations(path, TimeUnit::Microseconds)?
            .into_iter()
            .map(TimeDelta::microseconds)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rustyhdf5_typemap::MemoryNative;
    use std::rc::Rc;

    fn file() -> H5File {
        H5File::create(Rc::new(MemoryNative::new()), "time.h5").unwrap()
    }

    #[test]
    fn timestamps_round_trip_at_millisecond_precision() {
        let file = file();
        let times = vec![
            Utc.timestamp_millis_opt(0).unwrap(),
            Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        ];
        file.times().write_timestamps("t", &times).unwrap();
        assert_eq!(file.times().read_timestamps("t").unwrap(), times);
        assert_eq!(file.type_variant("t").unwrap(), TypeVariant::Timestamp);

        file.times().write_timestamp("one", times[1]).unwrap();
        assert_eq!(file.times().read_timestamp("one").unwrap(), times[1]);
        assert!(file.dataset_info("one").unwrap().is_scalar());
    }

    #[test]
    fn plain_integers_are_not_timestamps() {
        let file = file();
        file.writer::<i64>().write_array("n", &[1, 2]).unwrap();
        let err = file.times().read_timestamps("n").unwrap_err();
        assert!(matches!(
            err,
            Error::WrongTypeVariant {
                expected: TypeVariant::Timestamp,
                found: TypeVariant::None,
                ..
            }
        ));
        assert!(file.times().read_durations("n", TimeUnit::Seconds).is_err());
    }

    #[rstest]
    #[case(TimeUnit::Hours, vec![1, 2], TimeUnit::Minutes, vec![60, 120])]
    #[case(TimeUnit::Seconds, vec![90, -90], TimeUnit::Minutes, vec![1, -1])]
    #[case(TimeUnit::Days, vec![1], TimeUnit::Days, vec![1])]
    fn durations_convert_on_read(
        #[case] stored: TimeUnit,
        #[case] values: Vec<i64>,
        #[case] wanted: TimeUnit,
        #[case] expected: Vec<i64>,
    ) {
        let file = file();
        file.times().write_durations("d", &values, stored).unwrap();
        assert_eq!(file.times().stored_unit("d", wanted).unwrap(), stored);
        assert_eq!(file.times().read_durations("d", wanted).unwrap(), expected);
    }

    #[test]
    fn time_deltas_round_trip_in_their_unit() {
        let file = file();
        let deltas = vec![TimeDelta::seconds(5), TimeDelta::milliseconds(-1500)];
        file.times().write_time_deltas("d", &deltas, TimeUnit::Milliseconds).unwrap();
        assert_eq!(file.times().read_durations("d", TimeUnit::Milliseconds).unwrap(), vec![5000, -1500]);
        assert_eq!(file.times().read_time_deltas("d").unwrap(), deltas);
    }
}
