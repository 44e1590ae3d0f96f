pub const SELECT_LATEST_POSITION: &str = r#"
SELECT latitude, longitude, unix_time FROM aivdm WHERE mmsi = $1::bigint ORDER BY unix_time DESC LIMIT 1;
"#;
