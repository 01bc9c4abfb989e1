// Annotated CSV parsing for InfluxDB query responses
use crate::domain::history::HistoricalPoint;
use crate::domain::measurement::MeasurementKind;
use crate::domain::time_format::parse_iso;

const COMMENT_MARKER: u8 = b'#';
const TIME_COLUMN: &str = "_time";
const VALUE_COLUMN: &str = "_value";

/// Parse a tabular query response into points for one sensor and measurement.
///
/// The header is the first record that is neither blank nor a comment. A
/// missing header, or one without `_time` and `_value`, yields no points.
/// Rows that are too short or whose time/value do not parse are skipped;
/// everything else is kept in input order. Quoted cells follow RFC 4180.
pub fn parse(text: &str, kind: MeasurementKind, sensor_id: &str) -> Vec<HistoricalPoint> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(COMMENT_MARKER))
        .from_reader(text.as_bytes());
    let mut records = reader
        .records()
        .filter_map(Result::ok)
        .skip_while(|record| record.iter().all(|cell| cell.trim().is_empty()));

    let Some(header) = records.next() else {
        return Vec::new();
    };
    let time_idx = header.iter().position(|c| c.trim() == TIME_COLUMN);
    let value_idx = header.iter().position(|c| c.trim() == VALUE_COLUMN);
    let (Some(time_idx), Some(value_idx)) = (time_idx, value_idx) else {
        tracing::debug!("Query response header lacks {} or {}: {:?}", TIME_COLUMN, VALUE_COLUMN, header);
        return Vec::new();
    };

    let mut points = Vec::new();
    for record in records {
        let (Some(raw_time), Some(raw_value)) = (record.get(time_idx), record.get(value_idx)) else {
            continue;
        };

        let raw_time = raw_time.trim();
        let Some(timestamp) = parse_iso(raw_time) else {
            continue;
        };
        let Ok(value) = raw_value.trim().parse::<f64>() else {
            continue;
        };

        points.push(HistoricalPoint::new(
            timestamp,
            raw_time.to_string(),
            sensor_id.to_string(),
            kind,
            value,
        ));
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_row_after_comments() {
        let text = "#comment\n#comment\n_time,_value\n2024-01-01T00:00:00Z,12.5";
        let points = parse(text, MeasurementKind::SoilMoisture, "oak-7");

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].original_timestamp, "2024-01-01T00:00:00Z");
        assert_eq!(points[0].timestamp.timestamp(), 1_704_067_200);
        assert_eq!(points[0].value, 12.5);
        assert_eq!(points[0].sensor_id, "oak-7");
        assert_eq!(points[0].measurement_kind, MeasurementKind::SoilMoisture);
    }

    #[test]
    fn test_header_without_value_column_is_empty() {
        let text = "_time,_field\n2024-01-01T00:00:00Z,battery";
        assert!(parse(text, MeasurementKind::Battery, "oak-7").is_empty());
        assert!(parse("#only\n#comments\n", MeasurementKind::Battery, "oak-7").is_empty());
        assert!(parse("", MeasurementKind::Battery, "oak-7").is_empty());
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let text = "_time,_value\n\
                    2024-01-01T00:00:00Z,abc\n\
                    not-a-time,3.0\n\
                    2024-01-01T00:10:00Z\n\
                    2024-01-01T00:20:00Z,4.25\n\
                    2024-01-01T00:05:00Z,1\n";
        let points = parse(text, MeasurementKind::AirHumidity, "oak-7");

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![4.25, 1.0]);
    }

    #[test]
    fn test_quoted_cells_are_unquoted() {
        let text = "_time,_value,_measurement\n\
                    \"2024-01-01T00:00:00Z\",\"12.5\",\"oak, north side\"\n\
                    2024-01-01T01:00:00Z,\"13\",\"said \"\"hi\"\"\"\n";
        let points = parse(text, MeasurementKind::SoilMoisture, "oak-7");

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].original_timestamp, "2024-01-01T00:00:00Z");
        assert_eq!(points[0].value, 12.5);
        assert_eq!(points[1].value, 13.0);
    }

    #[test]
    fn test_influx_annotated_csv() {
        let text = "#group,false,false,true,true,false,false,true,true\r\n\
                    #datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string\r\n\
                    #default,_result,,,,,,,\r\n\
                    ,result,table,_start,_stop,_time,_value,_field,_measurement\r\n\
                    ,,0,2024-01-01T00:00:00Z,2024-01-31T00:00:00Z,2024-01-02T08:00:00.123Z,1830,wood_resistance,oak-7\r\n\
                    ,,0,2024-01-01T00:00:00Z,2024-01-31T00:00:00Z,2024-01-02T09:00:00Z,1795.5,wood_resistance,oak-7\r\n\
                    \r\n";
        let points = parse(text, MeasurementKind::WoodResistance, "oak-7");

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].original_timestamp, "2024-01-02T08:00:00.123Z");
        assert_eq!(points[0].value, 1830.0);
        assert_eq!(points[1].value, 1795.5);
    }
}
