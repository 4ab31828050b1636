//! Decoding of published trip-data parquet files.

use crate::data::trips::TripRecord;
use crate::error::MlError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::basic::{ConvertedType, LogicalType, TimeUnit, Type as PhysicalType};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use parquet::schema::types::ColumnDescriptor;
use taxiflow_core::TaxiColor;
use tracing::debug;

const PU_LOCATION: &str = "PULocationID";
const DO_LOCATION: &str = "DOLocationID";
const TRIP_DISTANCE: &str = "trip_distance";

/// Resolution of a raw INT64 timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampUnit {
    Millis,
    Micros,
    Nanos,
}

impl TimestampUnit {
    /// Unit declared by a column's logical or converted type.
    fn of(column: &ColumnDescriptor) -> Result<Self, MlError> {
        if let Some(LogicalType::Timestamp { unit, .. }) = column.logical_type() {
            return Ok(match unit {
                TimeUnit::MILLIS(_) => TimestampUnit::Millis,
                TimeUnit::MICROS(_) => TimestampUnit::Micros,
                TimeUnit::NANOS(_) => TimestampUnit::Nanos,
            });
        }
        match (column.converted_type(), column.physical_type()) {
            (ConvertedType::TIMESTAMP_MILLIS, _) => Ok(TimestampUnit::Millis),
            (ConvertedType::TIMESTAMP_MICROS, _) => Ok(TimestampUnit::Micros),
            // INT96 rows come out of the reader as timestamp fields already.
            (_, PhysicalType::INT96) => Ok(TimestampUnit::Nanos),
            (_, physical) => Err(MlError::dataset(format!(
                "column '{}' is {physical} without a timestamp type",
                column.name()
            ))),
        }
    }
}

/// Units of the pickup and dropoff columns of one file.
#[derive(Debug, Clone, Copy)]
struct TimestampUnits {
    pickup: TimestampUnit,
    dropoff: TimestampUnit,
}

/// Column names for one taxi color.
#[derive(Debug, Clone)]
struct TripColumns {
    pickup: String,
    dropoff: String,
}

impl TripColumns {
    fn for_color(color: TaxiColor) -> Self {
        let prefix = color.timestamp_prefix();
        Self {
            pickup: format!("{prefix}_pickup_datetime"),
            dropoff: format!("{prefix}_dropoff_datetime"),
        }
    }
}

/// Decode a whole parquet file into trip records.
///
/// Rows missing a timestamp, a location id, or the distance are skipped.
/// Other columns are ignored.
pub fn decode_trips(data: Bytes, color: TaxiColor) -> Result<Vec<TripRecord>, MlError> {
    let reader = SerializedFileReader::new(data)?;
    let columns = TripColumns::for_color(color);
    let units = check_columns(&reader, &columns)?;

    let expected = reader.metadata().file_metadata().num_rows();
    let mut records = Vec::with_capacity(usize::try_from(expected).unwrap_or(0));
    let mut skipped = 0usize;

    for row in reader.get_row_iter(None)? {
        let row = row?;
        let mut pickup = None;
        let mut dropoff = None;
        let mut pu = None;
        let mut dropoff_location = None;
        let mut distance = None;

        for (name, field) in row.get_column_iter() {
            let name = name.as_str();
            if name == columns.pickup {
                pickup = field_timestamp(field, units.pickup);
            } else if name == columns.dropoff {
                dropoff = field_timestamp(field, units.dropoff);
            } else if name == PU_LOCATION {
                pu = field_i64(field);
            } else if name == DO_LOCATION {
                dropoff_location = field_i64(field);
            } else if name == TRIP_DISTANCE {
                distance = field_f64(field);
            }
        }

        match (pickup, dropoff, pu, dropoff_location, distance) {
            (Some(pickup), Some(dropoff), Some(pu), Some(dl), Some(distance)) => {
                records.push(TripRecord::new(pickup, dropoff, pu, dl, distance));
            }
            _ => skipped += 1,
        }
    }

    debug!(
        rows = records.len(),
        skipped,
        color = %color,
        "Decoded trip parquet"
    );
    Ok(records)
}

/// Require every column the decoder reads and resolve the timestamp units.
fn check_columns(
    reader: &SerializedFileReader<Bytes>,
    columns: &TripColumns,
) -> Result<TimestampUnits, MlError> {
    let schema = reader.metadata().file_metadata().schema_descr();
    let find = |required: &str| {
        schema
            .columns()
            .iter()
            .find(|c| c.name() == required)
            .ok_or_else(|| {
                MlError::dataset(format!("parquet file is missing column '{required}'"))
            })
    };
    for required in [PU_LOCATION, DO_LOCATION, TRIP_DISTANCE] {
        find(required)?;
    }
    Ok(TimestampUnits {
        pickup: TimestampUnit::of(find(columns.pickup.as_str())?)?,
        dropoff: TimestampUnit::of(find(columns.dropoff.as_str())?)?,
    })
}

fn field_timestamp(field: &Field, unit: TimestampUnit) -> Option<DateTime<Utc>> {
    match field {
        Field::TimestampMicros(v) => DateTime::from_timestamp_micros(*v),
        Field::TimestampMillis(v) => DateTime::from_timestamp_millis(*v),
        Field::Long(v) => match unit {
            TimestampUnit::Millis => DateTime::from_timestamp_millis(*v),
            TimestampUnit::Micros => DateTime::from_timestamp_micros(*v),
            TimestampUnit::Nanos => Some(DateTime::from_timestamp_nanos(*v)),
        },
        _ => None,
    }
}

fn field_i64(field: &Field) -> Option<i64> {
    match field {
        Field::Byte(v) => Some(i64::from(*v)),
        Field::Short(v) => Some(i64::from(*v)),
        Field::Int(v) => Some(i64::from(*v)),
        Field::Long(v) => Some(*v),
        Field::UInt(v) => Some(i64::from(*v)),
        Field::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

fn field_f64(field: &Field) -> Option<f64> {
    match field {
        Field::Double(v) => Some(*v),
        Field::Float(v) => Some(f64::from(*v)),
        Field::Int(v) => Some(f64::from(*v)),
        Field::Long(v) => Some(*v as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_names_follow_color() {
        let yellow = TripColumns::for_color(TaxiColor::Yellow);
        assert_eq!(yellow.pickup, "tpep_pickup_datetime");
        let green = TripColumns::for_color(TaxiColor::Green);
        assert_eq!(green.dropoff, "lpep_dropoff_datetime");
    }

    #[test]
    fn test_field_conversions() {
        assert_eq!(field_i64(&Field::Int(43)), Some(43));
        assert_eq!(field_i64(&Field::Double(7.0)), Some(7));
        assert_eq!(field_i64(&Field::Null), None);
        assert_eq!(field_f64(&Field::Float(1.5)), Some(1.5));
        assert_eq!(
            field_timestamp(&Field::TimestampMillis(0), TimestampUnit::Micros),
            DateTime::from_timestamp(0, 0)
        );
    }

    #[test]
    fn test_plain_longs_follow_the_column_unit() {
        let ten_minutes = DateTime::from_timestamp(600, 0);
        assert_eq!(
            field_timestamp(&Field::Long(600_000_000_000), TimestampUnit::Nanos),
            ten_minutes
        );
        assert_eq!(
            field_timestamp(&Field::Long(600_000_000), TimestampUnit::Micros),
            ten_minutes
        );
        assert_eq!(
            field_timestamp(&Field::Long(600_000), TimestampUnit::Millis),
            ten_minutes
        );
    }

    #[test]
    fn test_garbage_is_a_parquet_error() {
        let err = decode_trips(Bytes::from_static(b"not parquet"), TaxiColor::Green).unwrap_err();
        assert!(matches!(err, MlError::Parquet(_)));
    }
}
