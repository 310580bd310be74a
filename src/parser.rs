use chrono::{DateTime, Utc};
use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Result, RouteError};
use crate::gpx_types::*;

/// Parse a GPX XML string into GpxData.
///
/// Fails with `InvalidFormat` when the text is not XML or the root element is
/// not `<gpx>`, and with `NoTrackData` when no track point has usable
/// coordinates. Points with missing or non-numeric `lat`/`lon` are skipped.
pub fn parse_gpx(xml: &str) -> Result<GpxData> {
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"gpx" => break,
            Event::Empty(e) if e.local_name().as_ref() == b"gpx" => {
                return Err(RouteError::NoTrackData);
            }
            Event::Start(e) | Event::Empty(e) => {
                let root = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                return Err(RouteError::invalid_format(format!(
                    "expected <gpx> root element, found <{root}>"
                )));
            }
            Event::Eof => {
                return Err(RouteError::invalid_format("missing <gpx> root element"));
            }
            _ => {}
        }
    }

    let mut data = GpxData::default();
    let mut skipped = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"metadata" => data.metadata = parse_metadata(&mut reader)?,
                b"wpt" => {
                    if let Some(wpt) = parse_waypoint(&e, &mut reader)? {
                        data.waypoints.push(wpt);
                    }
                }
                b"trk" => data.tracks.push(parse_track(&mut reader, &mut skipped)?),
                // GPX 1.0 keeps name/desc/author directly under the root
                b"name" => data.metadata.name = Some(read_text_owned(&mut reader, &e)?),
                b"desc" => data.metadata.description = Some(read_text_owned(&mut reader, &e)?),
                b"author" => data.metadata.author = parse_author(&e, &mut reader)?,
                b"time" => data.metadata.time = parse_time(&read_text_owned(&mut reader, &e)?),
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"wpt" {
                    if let Some((lat, lng)) = parse_lat_lon(&e) {
                        data.waypoints.push(Waypoint::new(lat, lng));
                    }
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"gpx" => break,
            Event::Eof => {
                return Err(RouteError::invalid_format("unexpected end of document"));
            }
            _ => {}
        }
    }

    let valid: usize = data.segments().map(|s| s.points.len()).sum();
    if valid == 0 {
        return Err(RouteError::NoTrackData);
    }
    data.skipped_points = skipped;
    if skipped > valid {
        warn!("GPX parse skipped {skipped} track points without valid coordinates, kept {valid}");
    } else if skipped > 0 {
        debug!("GPX parse skipped {skipped} track points without valid coordinates");
    }

    Ok(data)
}

/// Read `lat`/`lon` attributes. `None` when either is missing, non-numeric
/// or outside the WGS84 range.
fn parse_lat_lon(e: &BytesStart<'_>) -> Option<(f64, f64)> {
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;

    for attr in e.attributes().flatten() {
        let val = std::str::from_utf8(&attr.value).ok()?.trim();
        match attr.key.local_name().as_ref() {
            b"lat" => lat = val.parse::<f64>().ok(),
            b"lon" => lon = val.parse::<f64>().ok(),
            _ => {}
        }
    }

    let (lat, lon) = (lat?, lon?);
    let in_range = lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon);
    in_range.then_some((lat, lon))
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(text.trim()) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            debug!("ignoring unparseable GPX time '{text}': {e}");
            None
        }
    }
}

/// Parse a `<trkpt>` and its children. Called after Event::Start.
fn parse_track_point<'a>(
    start: &BytesStart<'a>,
    reader: &mut Reader<&'a [u8]>,
) -> Result<Option<TrackPoint>> {
    let Some((lat, lng)) = parse_lat_lon(start) else {
        reader.read_to_end(start.name())?;
        return Ok(None);
    };

    let mut point = TrackPoint::new(lat, lng);
    let end_name = start.name().0.to_vec();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"ele" => point.elevation = parse_elevation(&read_text_owned(reader, &e)?),
                b"time" => point.time = parse_time(&read_text_owned(reader, &e)?),
                _ => {
                    // extensions, GPX 1.0 speed/course, ...
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(e) if e.name().0 == end_name.as_slice() => break,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(Some(point))
}

fn parse_elevation(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a `<wpt>` and its children. Called after Event::Start.
fn parse_waypoint<'a>(
    start: &BytesStart<'a>,
    reader: &mut Reader<&'a [u8]>,
) -> Result<Option<Waypoint>> {
    let Some((lat, lng)) = parse_lat_lon(start) else {
        reader.read_to_end(start.name())?;
        return Ok(None);
    };

    let mut wpt = Waypoint::new(lat, lng);
    let end_name = start.name().0.to_vec();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"ele" => wpt.elevation = parse_elevation(&read_text_owned(reader, &e)?),
                b"name" => wpt.name = Some(read_text_owned(reader, &e)?),
                b"desc" => wpt.description = Some(read_text_owned(reader, &e)?),
                b"sym" => wpt.symbol = Some(read_text_owned(reader, &e)?),
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(e) if e.name().0 == end_name.as_slice() => break,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(Some(wpt))
}

/// Parse a `<metadata>` element.
fn parse_metadata<'a>(reader: &mut Reader<&'a [u8]>) -> Result<GpxMetadata> {
    let mut metadata = GpxMetadata::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"name" => metadata.name = Some(read_text_owned(reader, &e)?),
                b"desc" => metadata.description = Some(read_text_owned(reader, &e)?),
                b"author" => metadata.author = parse_author(&e, reader)?,
                b"time" => metadata.time = parse_time(&read_text_owned(reader, &e)?),
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(e) if e.local_name().as_ref() == b"metadata" => break,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(metadata)
}

/// `<author>` is a person element in GPX 1.1 (`<author><name>..</name></author>`)
/// and plain text in GPX 1.0.
fn parse_author<'a>(
    start: &BytesStart<'a>,
    reader: &mut Reader<&'a [u8]>,
) -> Result<Option<String>> {
    let end_name = start.name().0.to_vec();
    let mut name: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"name" => name = Some(read_text_owned(reader, &e)?),
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::Text(e) => text.push_str(std::str::from_utf8(e.as_ref()).unwrap_or_default()),
            Event::End(e) if e.name().0 == end_name.as_slice() => break,
            Event::Eof => break,
            _ => {}
        }
    }

    let text = text.trim();
    Ok(name.or_else(|| (!text.is_empty()).then(|| text.to_string())))
}

/// Parse a `<trk>` element.
fn parse_track<'a>(reader: &mut Reader<&'a [u8]>, skipped: &mut usize) -> Result<GpxTrack> {
    let mut track = GpxTrack::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"name" => track.name = Some(read_text_owned(reader, &e)?),
                b"type" => track.track_type = Some(read_text_owned(reader, &e)?),
                b"trkseg" => {
                    let seg = parse_segment(reader, skipped)?;
                    if !seg.points.is_empty() {
                        track.segments.push(seg);
                    }
                }
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::End(e) if e.local_name().as_ref() == b"trk" => break,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(track)
}

/// Parse a `<trkseg>` element.
fn parse_segment<'a>(reader: &mut Reader<&'a [u8]>, skipped: &mut usize) -> Result<GpxSegment> {
    let mut segment = GpxSegment::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"trkpt" => match parse_track_point(&e, reader)? {
                    Some(pt) => segment.points.push(pt),
                    None => *skipped += 1,
                },
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"trkpt" {
                    match parse_lat_lon(&e) {
                        Some((lat, lng)) => segment.points.push(TrackPoint::new(lat, lng)),
                        None => *skipped += 1,
                    }
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"trkseg" => break,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(segment)
}

/// Read text content of an element as an owned String.
/// Handles regular text, CDATA sections, and entity references (Event::GeneralRef).
fn read_text_owned<'a>(reader: &mut Reader<&'a [u8]>, start: &BytesStart<'_>) -> Result<String> {
    let end_name = start.name().0.to_vec();
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                text.push_str(std::str::from_utf8(e.as_ref()).unwrap_or_default());
            }
            Event::CData(e) => {
                text.push_str(std::str::from_utf8(e.as_ref()).unwrap_or_default());
            }
            Event::GeneralRef(e) => {
                if let Ok(Some(ch)) = e.resolve_char_ref() {
                    text.push(ch);
                } else {
                    match std::str::from_utf8(e.as_ref()).unwrap_or_default() {
                        "amp" => text.push('&'),
                        "lt" => text.push('<'),
                        "gt" => text.push('>'),
                        "quot" => text.push('"'),
                        "apos" => text.push('\''),
                        _ => {}
                    }
                }
            }
            Event::End(e) if e.name().0 == end_name.as_slice() => break,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_track() {
        let xml = r#"<?xml version="1.0"?>
<gpx version="1.1">
  <trk>
    <name>Anello del Monte Amiata</name>
    <trkseg>
      <trkpt lat="42.88" lon="11.62"><ele>1100.0</ele></trkpt>
      <trkpt lat="42.881" lon="11.621"><ele>1112.5</ele></trkpt>
      <trkpt lat="42.882" lon="11.622"/>
    </trkseg>
  </trk>
</gpx>"#;
        let data = parse_gpx(xml).unwrap();
        assert_eq!(data.tracks.len(), 1);
        assert_eq!(data.display_name(), Some("Anello del Monte Amiata"));

        let points = data.track_points();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].elevation, Some(1100.0));
        assert_eq!(points[1].elevation, Some(1112.5));
        assert_eq!(points[2].elevation, None);
        assert!((points[2].lng - 11.622).abs() < 1e-10);
    }

    #[test]
    fn test_missing_root_is_invalid_format() {
        let xml = r#"<?xml version="1.0"?><kml><Placemark/></kml>"#;
        assert!(matches!(
            parse_gpx(xml),
            Err(RouteError::InvalidFormat { .. })
        ));
        assert!(matches!(
            parse_gpx("just some text"),
            Err(RouteError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_malformed_xml_is_invalid_format() {
        let xml = r#"<gpx version="1.1"><trk><trkseg></trk></gpx>"#;
        assert!(matches!(
            parse_gpx(xml),
            Err(RouteError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_no_track_points() {
        let xml = r#"<?xml version="1.0"?>
<gpx version="1.1">
  <wpt lat="42.0" lon="11.0"><name>Only a waypoint</name></wpt>
</gpx>"#;
        assert!(matches!(parse_gpx(xml), Err(RouteError::NoTrackData)));
        assert!(matches!(
            parse_gpx(r#"<gpx version="1.1"/>"#),
            Err(RouteError::NoTrackData)
        ));
    }

    #[test]
    fn test_invalid_points_skipped() {
        let xml = r#"<?xml version="1.0"?>
<gpx version="1.1">
  <trk><trkseg>
    <trkpt lat="42.0" lon="11.0"/>
    <trkpt lat="abc" lon="11.0"/>
    <trkpt lon="11.0"><ele>5</ele></trkpt>
    <trkpt lat="95.0" lon="11.0"/>
    <trkpt lat="42.1" lon="11.1"/>
  </trkseg></trk>
</gpx>"#;
        let data = parse_gpx(xml).unwrap();
        assert_eq!(data.skipped_points, 3);
        let points = data.track_points();
        assert_eq!(points.len(), 2);
        assert!((points[1].lat - 42.1).abs() < 1e-10);
    }

    #[test]
    fn test_all_points_invalid() {
        let xml = r#"<gpx version="1.1"><trk><trkseg>
    <trkpt lat="x" lon="y"/>
    <trkpt lat="" lon=""/>
</trkseg></trk></gpx>"#;
        assert!(matches!(parse_gpx(xml), Err(RouteError::NoTrackData)));
    }

    #[test]
    fn test_segments_preserved_and_flattened_in_order() {
        let xml = r#"<gpx version="1.1">
  <trk>
    <trkseg><trkpt lat="1.0" lon="1.0"/><trkpt lat="1.1" lon="1.1"/></trkseg>
    <trkseg></trkseg>
    <trkseg><trkpt lat="2.0" lon="2.0"/></trkseg>
  </trk>
  <trk>
    <trkseg><trkpt lat="3.0" lon="3.0"/></trkseg>
  </trk>
</gpx>"#;
        let data = parse_gpx(xml).unwrap();
        assert_eq!(data.segment_count(), 3);
        let lats: Vec<f64> = data.track_points().iter().map(|p| p.lat).collect();
        assert_eq!(lats, vec![1.0, 1.1, 2.0, 3.0]);
    }

    #[test]
    fn test_waypoints() {
        let xml = r#"<?xml version="1.0"?>
<gpx xmlns="http://www.topografix.com/GPX/1/1" version="1.1">
  <wpt lat="42.69" lon="11.91">
    <ele>310</ele>
    <name>Fonte</name>
    <desc>Drinking water</desc>
    <sym>Drinking Water</sym>
  </wpt>
  <wpt lat="42.70" lon="11.92"/>
  <trk><trkseg><trkpt lat="42.68" lon="11.90"/></trkseg></trk>
</gpx>"#;
        let data = parse_gpx(xml).unwrap();
        assert_eq!(data.waypoints.len(), 2);
        let w = &data.waypoints[0];
        assert_eq!(w.elevation, Some(310.0));
        assert_eq!(w.name.as_deref(), Some("Fonte"));
        assert_eq!(w.description.as_deref(), Some("Drinking water"));
        assert_eq!(w.symbol.as_deref(), Some("Drinking Water"));
        assert_eq!(data.waypoints[1].name, None);
        assert_eq!(data.track_points().len(), 1);
    }

    #[test]
    fn test_metadata_gpx11() {
        let xml = r#"<gpx version="1.1">
  <metadata>
    <name>Via Francigena</name>
    <desc>Tappa 32</desc>
    <author><name>Ufficio Turistico</name><email id="info" domain="example.org"/></author>
    <time>2024-05-01T08:00:00Z</time>
  </metadata>
  <trk><name>Track name</name><trkseg><trkpt lat="42.0" lon="11.0"/></trkseg></trk>
</gpx>"#;
        let data = parse_gpx(xml).unwrap();
        assert_eq!(data.metadata.name.as_deref(), Some("Via Francigena"));
        assert_eq!(data.metadata.description.as_deref(), Some("Tappa 32"));
        assert_eq!(data.metadata.author.as_deref(), Some("Ufficio Turistico"));
        assert!(data.metadata.time.is_some());
        assert_eq!(data.display_name(), Some("Via Francigena"));
    }

    #[test]
    fn test_metadata_gpx10() {
        let xml = r#"<gpx xmlns="http://www.topografix.com/GPX/1/0" version="1.0">
  <name>Legacy</name>
  <author>Mario Rossi</author>
  <trk><trkseg>
    <trkpt lat="42.0" lon="11.0"><speed>5.5</speed><course>180</course></trkpt>
  </trkseg></trk>
</gpx>"#;
        let data = parse_gpx(xml).unwrap();
        assert_eq!(data.metadata.name.as_deref(), Some("Legacy"));
        assert_eq!(data.metadata.author.as_deref(), Some("Mario Rossi"));
    }

    #[test]
    fn test_times_and_extensions() {
        let xml = r#"<gpx version="1.1"><trk><trkseg>
  <trkpt lat="42.0" lon="11.0">
    <time>2024-05-01T08:00:00+02:00</time>
    <extensions><gpxtpx:TrackPointExtension xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1"><gpxtpx:hr>150</gpxtpx:hr></gpxtpx:TrackPointExtension></extensions>
  </trkpt>
  <trkpt lat="42.1" lon="11.1"><time>not a time</time></trkpt>
</trkseg></trk></gpx>"#;
        let points = parse_gpx(xml).unwrap().track_points();
        assert_eq!(points.len(), 2);
        assert_eq!(
            points[0].time.unwrap().to_rfc3339(),
            "2024-05-01T06:00:00+00:00"
        );
        assert_eq!(points[1].time, None);
    }

    #[test]
    fn test_cdata_and_entities() {
        let xml = r#"<gpx version="1.1">
  <wpt lat="42.0" lon="11.0"><name><![CDATA[Bar & Caffè]]></name><desc>a &lt; b &amp; c</desc></wpt>
  <trk><trkseg><trkpt lat="42.0" lon="11.0"/></trkseg></trk>
</gpx>"#;
        let data = parse_gpx(xml).unwrap();
        assert_eq!(data.waypoints[0].name.as_deref(), Some("Bar & Caffè"));
        assert_eq!(data.waypoints[0].description.as_deref(), Some("a < b & c"));
    }

    #[test]
    fn test_rte_ignored() {
        let xml = r#"<gpx version="1.1">
  <rte><rtept lat="1.0" lon="1.0"/><rtept lat="2.0" lon="2.0"/></rte>
  <trk><trkseg><trkpt lat="42.0" lon="11.0"/></trkseg></trk>
</gpx>"#;
        assert_eq!(parse_gpx(xml).unwrap().track_points().len(), 1);
    }
}
