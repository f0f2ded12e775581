//! OSS XML document rendering and parsing.
//!
//! Every OSS response body is an XML document.  This module renders the
//! handful of documents the gateway produces itself using `quick-xml`,
//! and parses the two request bodies it has to understand (ACL and
//! multi-object delete).

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use crate::errors::OssError;

type XmlWriter = Writer<Cursor<Vec<u8>>>;

// ── Error response ──────────────────────────────────────────────────

/// Render an OSS `<Error>` XML document.
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <Error>
///   <Code>NoSuchBucket</Code>
///   <Message>The specified bucket does not exist.</Message>
///   <BucketName>mybucket</BucketName>
///   <RequestId>5C3D9175B6FC201293AD4890</RequestId>
/// </Error>
/// ```
pub fn render_error(
    code: &str,
    message: &str,
    details: &[(&'static str, String)],
    request_id: &str,
) -> String {
    let mut writer = start_document();

    writer
        .write_event(Event::Start(BytesStart::new("Error")))
        .expect("start Error");
    write_text_element(&mut writer, "Code", code);
    write_text_element(&mut writer, "Message", message);
    for (tag, value) in details {
        write_text_element(&mut writer, tag, value);
    }
    write_text_element(&mut writer, "RequestId", request_id);
    writer
        .write_event(Event::End(BytesEnd::new("Error")))
        .expect("end Error");

    finish_document(writer)
}

// ── ListAllMyBucketsResult ──────────────────────────────────────────

/// Render the `<ListAllMyBucketsResult>` response for `GET /`.
///
/// `buckets` is a list of `(name, creation_date)` pairs.
pub fn render_list_buckets_result(
    owner_id: &str,
    owner_display: &str,
    buckets: &[(&str, &str)],
) -> String {
    let mut writer = start_document();

    writer
        .write_event(Event::Start(BytesStart::new("ListAllMyBucketsResult")))
        .expect("start root");

    write_simple_element_group(
        &mut writer,
        "Owner",
        &[("ID", owner_id), ("DisplayName", owner_display)],
    );

    writer
        .write_event(Event::Start(BytesStart::new("Buckets")))
        .expect("start Buckets");
    for (name, created) in buckets {
        write_simple_element_group(
            &mut writer,
            "Bucket",
            &[("Name", name), ("CreationDate", created)],
        );
    }
    writer
        .write_event(Event::End(BytesEnd::new("Buckets")))
        .expect("end Buckets");

    writer
        .write_event(Event::End(BytesEnd::new("ListAllMyBucketsResult")))
        .expect("end root");

    finish_document(writer)
}

// ── ListBucketResult ────────────────────────────────────────────────

/// A single object entry inside a bucket listing.
pub struct ObjectEntry<'a> {
    pub key: &'a str,
    pub last_modified: &'a str,
    pub etag: &'a str,
    pub size: u64,
    pub storage_class: &'a str,
}

/// Listing parameters echoed back in `<ListBucketResult>`.
pub struct ListingParams<'a> {
    pub bucket: &'a str,
    pub prefix: &'a str,
    pub marker: &'a str,
    pub delimiter: &'a str,
    pub max_keys: u32,
    pub is_truncated: bool,
    pub next_marker: Option<&'a str>,
}

/// Render `<ListBucketResult>` for a bucket listing.
pub fn render_list_objects_result(
    params: &ListingParams<'_>,
    owner_id: &str,
    entries: &[ObjectEntry<'_>],
    common_prefixes: &[&str],
) -> String {
    let mut writer = start_document();

    writer
        .write_event(Event::Start(BytesStart::new("ListBucketResult")))
        .expect("start root");

    write_text_element(&mut writer, "Name", params.bucket);
    write_text_element(&mut writer, "Prefix", params.prefix);
    write_text_element(&mut writer, "Marker", params.marker);
    write_text_element(&mut writer, "MaxKeys", &params.max_keys.to_string());
    write_text_element(&mut writer, "Delimiter", params.delimiter);
    write_text_element(
        &mut writer,
        "IsTruncated",
        if params.is_truncated { "true" } else { "false" },
    );
    if let Some(next) = params.next_marker {
        write_text_element(&mut writer, "NextMarker", next);
    }

    for entry in entries {
        writer
            .write_event(Event::Start(BytesStart::new("Contents")))
            .expect("start Contents");
        write_text_element(&mut writer, "Key", entry.key);
        write_text_element(&mut writer, "LastModified", entry.last_modified);
        write_text_element(&mut writer, "ETag", entry.etag);
        write_text_element(&mut writer, "Type", "Normal");
        write_text_element(&mut writer, "Size", &entry.size.to_string());
        write_text_element(&mut writer, "StorageClass", entry.storage_class);
        write_simple_element_group(
            &mut writer,
            "Owner",
            &[("ID", owner_id), ("DisplayName", owner_id)],
        );
        writer
            .write_event(Event::End(BytesEnd::new("Contents")))
            .expect("end Contents");
    }

    for cp in common_prefixes {
        write_simple_element_group(&mut writer, "CommonPrefixes", &[("Prefix", cp)]);
    }

    writer
        .write_event(Event::End(BytesEnd::new("ListBucketResult")))
        .expect("end root");

    finish_document(writer)
}

// ── DeleteResult ────────────────────────────────────────────────────

/// A single failure in a multi-object delete response.
pub struct DeleteErrorEntry<'a> {
    pub key: &'a str,
    pub code: &'a str,
    pub message: &'a str,
}

/// Render `<DeleteResult>` for a multi-object delete.
pub fn render_delete_result(
    deleted: &[&str],
    errors: &[DeleteErrorEntry<'_>],
    quiet: bool,
) -> String {
    let mut writer = start_document();

    writer
        .write_event(Event::Start(BytesStart::new("DeleteResult")))
        .expect("start root");

    // Quiet mode reports failures only.
    if !quiet {
        for key in deleted {
            write_simple_element_group(&mut writer, "Deleted", &[("Key", key)]);
        }
    }

    for entry in errors {
        write_simple_element_group(
            &mut writer,
            "Error",
            &[
                ("Key", entry.key),
                ("Code", entry.code),
                ("Message", entry.message),
            ],
        );
    }

    writer
        .write_event(Event::End(BytesEnd::new("DeleteResult")))
        .expect("end root");

    finish_document(writer)
}

// ── Small single-purpose documents ──────────────────────────────────

/// Render `<CopyObjectResult>` returned by `PUT` with `x-oss-copy-source`.
pub fn render_copy_object_result(etag: &str, last_modified: &str) -> String {
    let mut writer = start_document();
    write_simple_element_group(
        &mut writer,
        "CopyObjectResult",
        &[("ETag", etag), ("LastModified", last_modified)],
    );
    finish_document(writer)
}

/// Render `<LocationConstraint>` for `GET /{bucket}?location`.
pub fn render_location_constraint(region: &str) -> String {
    let mut writer = start_document();
    write_text_element(&mut writer, "LocationConstraint", region);
    finish_document(writer)
}

/// Render an empty `<BucketLoggingStatus/>`: access logging is never enabled.
pub fn render_bucket_logging_status() -> String {
    let mut writer = start_document();
    writer
        .write_event(Event::Empty(BytesStart::new("BucketLoggingStatus")))
        .expect("empty BucketLoggingStatus");
    finish_document(writer)
}

/// Render an empty `<VersioningConfiguration/>`: versioning was never enabled.
pub fn render_versioning_configuration() -> String {
    let mut writer = start_document();
    writer
        .write_event(Event::Empty(BytesStart::new("VersioningConfiguration")))
        .expect("empty VersioningConfiguration");
    finish_document(writer)
}

// ── AccessControlPolicy ─────────────────────────────────────────────

/// Render `<AccessControlPolicy>` for `GET ?acl`.
///
/// OSS reports the canned ACL name directly inside `<Grant>`.
pub fn render_access_control_policy(owner_id: &str, owner_display: &str, grant: &str) -> String {
    let mut writer = start_document();

    writer
        .write_event(Event::Start(BytesStart::new("AccessControlPolicy")))
        .expect("start root");
    write_simple_element_group(
        &mut writer,
        "Owner",
        &[("ID", owner_id), ("DisplayName", owner_display)],
    );
    write_simple_element_group(&mut writer, "AccessControlList", &[("Grant", grant)]);
    writer
        .write_event(Event::End(BytesEnd::new("AccessControlPolicy")))
        .expect("end root");

    finish_document(writer)
}

/// Extract the canned ACL from an `<AccessControlPolicy>` request body.
pub fn parse_acl_grant(body: &[u8]) -> Result<String, OssError> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut in_grant = false;
    let mut grant = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Grant" => in_grant = true,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Grant" => in_grant = false,
            Ok(Event::Text(ref e)) if in_grant => {
                let text = e.unescape().map_err(|_| OssError::MalformedAcl)?;
                grant = Some(text.trim().to_string());
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(OssError::MalformedAcl),
            _ => {}
        }
        buf.clear();
    }

    grant.filter(|g| !g.is_empty()).ok_or(OssError::MalformedAcl)
}

/// Parse a `<Delete>` body into the list of keys and the quiet flag.
pub fn parse_delete_xml(body: &[u8]) -> Result<(Vec<String>, bool), OssError> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut keys = Vec::new();
    let mut quiet = false;
    let mut current_tag = String::new();
    let mut in_object = false;
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag_name.as_str() {
                    "Delete" => saw_root = true,
                    "Object" => in_object = true,
                    _ => {}
                }
                current_tag = tag_name;
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"Object" {
                    in_object = false;
                }
                current_tag.clear();
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|_| OssError::MalformedXml)?;
                if in_object && current_tag == "Key" {
                    keys.push(text.to_string());
                } else if current_tag == "Quiet" {
                    quiet = text.eq_ignore_ascii_case("true");
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(OssError::MalformedXml),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(OssError::MalformedXml);
    }
    Ok((keys, quiet))
}

// ── Helpers ─────────────────────────────────────────────────────────

fn start_document() -> XmlWriter {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("xml decl");
    writer
}

fn finish_document(writer: XmlWriter) -> String {
    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Write a `<tag>text</tag>` element.
fn write_text_element(writer: &mut XmlWriter, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}

/// Write a parent element containing a flat list of child text elements.
fn write_simple_element_group(writer: &mut XmlWriter, parent: &str, children: &[(&str, &str)]) {
    writer
        .write_event(Event::Start(BytesStart::new(parent)))
        .expect("start parent");
    for (tag, value) in children {
        write_text_element(writer, tag, value);
    }
    writer
        .write_event(Event::End(BytesEnd::new(parent)))
        .expect("end parent");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_with_details() {
        let xml = render_error(
            "NoSuchKey",
            "The specified key does not exist.",
            &[("Key", "a&b".to_string())],
            "ABCDEF0123456789",
        );
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<Code>NoSuchKey</Code>"));
        assert!(xml.contains("<Key>a&amp;b</Key>"));
        assert!(xml.contains("<RequestId>ABCDEF0123456789</RequestId>"));
    }

    #[test]
    fn test_render_access_control_policy() {
        let xml = render_access_control_policy("tenant:alice", "tenant:alice", "public-read");
        assert!(xml.contains("<Owner><ID>tenant:alice</ID>"));
        assert!(xml.contains("<AccessControlList><Grant>public-read</Grant></AccessControlList>"));
    }

    #[test]
    fn test_parse_acl_grant() {
        let body = b"<AccessControlPolicy><AccessControlList><Grant> public-read-write </Grant></AccessControlList></AccessControlPolicy>";
        assert_eq!(parse_acl_grant(body).unwrap(), "public-read-write");
        assert!(matches!(
            parse_acl_grant(b"<AccessControlPolicy/>"),
            Err(OssError::MalformedAcl)
        ));
    }

    #[test]
    fn test_parse_delete_xml() {
        let body = b"<Delete><Quiet>true</Quiet><Object><Key>a.txt</Key></Object><Object><Key>dir/b.txt</Key></Object></Delete>";
        let (keys, quiet) = parse_delete_xml(body).unwrap();
        assert_eq!(keys, vec!["a.txt", "dir/b.txt"]);
        assert!(quiet);
    }

    #[test]
    fn test_parse_delete_xml_requires_root() {
        assert!(matches!(
            parse_delete_xml(b"<Other/>"),
            Err(OssError::MalformedXml)
        ));
    }

    #[test]
    fn test_render_delete_result_quiet() {
        let errors = [DeleteErrorEntry {
            key: "b",
            code: "AccessDenied",
            message: "Access Denied",
        }];
        let xml = render_delete_result(&["a"], &errors, true);
        assert!(!xml.contains("<Deleted>"));
        assert!(xml.contains("<Error><Key>b</Key><Code>AccessDenied</Code>"));

        let xml = render_delete_result(&["a"], &[], false);
        assert!(xml.contains("<Deleted><Key>a</Key></Deleted>"));
    }

    #[test]
    fn test_render_list_objects_result() {
        let params = ListingParams {
            bucket: "photos",
            prefix: "2024/",
            marker: "",
            delimiter: "/",
            max_keys: 2,
            is_truncated: true,
            next_marker: Some("2024/b.jpg"),
        };
        let entries = [ObjectEntry {
            key: "2024/b.jpg",
            last_modified: "2024-01-01T00:00:00.000Z",
            etag: "\"abc\"",
            size: 12,
            storage_class: "Standard",
        }];
        let xml = render_list_objects_result(&params, "owner", &entries, &["2024/raw/"]);
        assert!(xml.contains("<Name>photos</Name>"));
        assert!(xml.contains("<IsTruncated>true</IsTruncated>"));
        assert!(xml.contains("<NextMarker>2024/b.jpg</NextMarker>"));
        assert!(xml.contains("<CommonPrefixes><Prefix>2024/raw/</Prefix></CommonPrefixes>"));
    }

    #[test]
    fn test_render_empty_documents() {
        assert!(render_bucket_logging_status().ends_with("<BucketLoggingStatus/>"));
        assert!(render_versioning_configuration().ends_with("<VersioningConfiguration/>"));
        assert!(render_location_constraint("oss-cn-hangzhou")
            .ends_with("<LocationConstraint>oss-cn-hangzhou</LocationConstraint>"));
    }
}
