use crate::database::models::{PendingVariant, ResolutionStatus, VariantRole};
use crate::services::assign::{ReviewBucket, UnassignedFile};
use crate::services::reconcile::{OverrideOutcome, PhashCandidate, Resolution};
use std::io::{self, Write};

/// Minimal CSV quoting: fields with commas, quotes, or newlines get
/// quoted, embedded quotes doubled. Everything the engine emits is ASCII
/// tokens and paths, so this covers the audit surface.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_row<W: Write>(w: &mut W, fields: &[&str]) -> io::Result<()> {
    let row: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
    writeln!(w, "{}", row.join(","))
}

pub fn write_needs_review_report<W: Write>(w: &mut W, rows: &[ReviewBucket]) -> io::Result<()> {
    write_row(w, &["bucket_prefix", "group_key", "reasons"])?;
    for row in rows {
        write_row(
            w,
            &[&row.bucket_prefix, &row.group_key, &row.reasons.join(";")],
        )?;
    }
    Ok(())
}

pub fn write_unassigned_report<W: Write>(w: &mut W, rows: &[UnassignedFile]) -> io::Result<()> {
    write_row(w, &["sha256", "original_relpath", "group_key", "reason"])?;
    for row in rows {
        write_row(
            w,
            &[&row.sha256, &row.original_relpath, &row.group_key, &row.reason],
        )?;
    }
    Ok(())
}

/// Still-queued AI variants: the orphans an operator most often wants to
/// chase down.
pub fn write_ai_orphans_report<W: Write>(w: &mut W, rows: &[PendingVariant]) -> io::Result<()> {
    write_row(
        w,
        &["sha256", "source", "join_key", "fastfoto_token", "img_token", "created_at"],
    )?;
    for row in rows {
        if row.role != VariantRole::AiFrontV1 {
            continue;
        }
        write_row(
            w,
            &[
                &row.file_sha256,
                &row.source,
                &row.join_key,
                row.fastfoto_token.as_deref().unwrap_or(""),
                row.img_token.as_deref().unwrap_or(""),
                &row.created_at,
            ],
        )?;
    }
    Ok(())
}

/// Full pending queue with a claimed flag: claimed rows already have a
/// live join key and will attach on the next assignment run.
pub fn write_pending_report<W: Write>(
    w: &mut W,
    rows: &[(PendingVariant, bool)],
) -> io::Result<()> {
    write_row(
        w,
        &[
            "sha256",
            "source",
            "role",
            "join_key",
            "fastfoto_token",
            "img_token",
            "claimed",
            "created_at",
        ],
    )?;
    for (row, claimed) in rows {
        write_row(
            w,
            &[
                &row.file_sha256,
                &row.source,
                row.role.as_str(),
                &row.join_key,
                row.fastfoto_token.as_deref().unwrap_or(""),
                row.img_token.as_deref().unwrap_or(""),
                if *claimed { "true" } else { "false" },
                &row.created_at,
            ],
        )?;
    }
    Ok(())
}

/// Resolution verdicts, optionally narrowed to one status so matched,
/// ambiguous, and no-signal rows can land in separate files.
pub fn write_resolution_report<W: Write>(
    w: &mut W,
    rows: &[Resolution],
    status: Option<ResolutionStatus>,
) -> io::Result<()> {
    write_row(
        w,
        &["sha256", "source", "role", "status", "confidence", "reason", "bucket_ids"],
    )?;
    for row in rows {
        if status.is_some_and(|s| s != row.status) {
            continue;
        }
        write_row(
            w,
            &[
                &row.file_sha256,
                &row.source,
                row.role.as_str(),
                row.status.as_str(),
                row.confidence.map(|c| c.as_str()).unwrap_or(""),
                &row.reason,
                &row.bucket_ids.join(";"),
            ],
        )?;
    }
    Ok(())
}

pub fn write_phash_report<W: Write>(w: &mut W, rows: &[PhashCandidate]) -> io::Result<()> {
    write_row(w, &["sha256", "bucket_id", "bucket_prefix", "distance"])?;
    for row in rows {
        write_row(
            w,
            &[
                &row.file_sha256,
                &row.bucket_id,
                &row.bucket_prefix,
                &row.distance.to_string(),
            ],
        )?;
    }
    Ok(())
}

pub fn write_overrides_report<W: Write>(w: &mut W, rows: &[OverrideOutcome]) -> io::Result<()> {
    write_row(w, &["pending_sha256", "target_bucket_prefix", "status", "reason"])?;
    for row in rows {
        write_row(
            w,
            &[
                &row.pending_sha256,
                &row.target_bucket_prefix,
                if row.applied { "applied" } else { "skipped" },
                row.reason.as_deref().unwrap_or(""),
            ],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Confidence;

    fn render<F: FnOnce(&mut Vec<u8>)>(f: F) -> String {
        let mut buf = Vec::new();
        f(&mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("has,comma"), "\"has,comma\"");
        assert_eq!(csv_field("has\"quote"), "\"has\"\"quote\"");
    }

    #[test]
    fn test_needs_review_report() {
        let rows = vec![ReviewBucket {
            bucket_prefix: "aabbccddeeff".to_string(),
            group_key: "fastfoto_000123".to_string(),
            reasons: vec![
                "luminance_flip_suspect".to_string(),
                "ambiguous_multiple_fronts".to_string(),
            ],
        }];
        let out = render(|buf| write_needs_review_report(buf, &rows).unwrap());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "bucket_prefix,group_key,reasons");
        assert_eq!(
            lines[1],
            "aabbccddeeff,fastfoto_000123,luminance_flip_suspect;ambiguous_multiple_fronts"
        );
    }

    #[test]
    fn test_pending_report_claimed_flag() {
        let variant = PendingVariant {
            file_sha256: "abc".to_string(),
            source: "family".to_string(),
            role: VariantRole::AiFrontV1,
            join_key: "beach".to_string(),
            fastfoto_token: Some("000123".to_string()),
            img_token: None,
            notes: vec![],
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
        };
        let out = render(|buf| {
            write_pending_report(buf, &[(variant.clone(), true), (variant, false)]).unwrap()
        });
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[1].contains(",true,"));
        assert!(lines[2].contains(",false,"));
    }

    #[test]
    fn test_resolution_report_status_filter() {
        let rows = vec![
            Resolution {
                file_sha256: "one".to_string(),
                source: "family".to_string(),
                role: VariantRole::AiFrontV1,
                status: ResolutionStatus::Match,
                confidence: Some(Confidence::High),
                reason: "bucket_prefix".to_string(),
                bucket_ids: vec!["b1".to_string()],
            },
            Resolution {
                file_sha256: "two".to_string(),
                source: "family".to_string(),
                role: VariantRole::AiFrontV1,
                status: ResolutionStatus::NoSignal,
                confidence: None,
                reason: "no_matching_tokens".to_string(),
                bucket_ids: vec![],
            },
        ];

        let all = render(|buf| write_resolution_report(buf, &rows, None).unwrap());
        assert_eq!(all.lines().count(), 3);

        let matched = render(|buf| {
            write_resolution_report(buf, &rows, Some(ResolutionStatus::Match)).unwrap()
        });
        assert_eq!(matched.lines().count(), 2);
        assert!(matched.contains("one,family,ai_front_v1,match,HIGH,bucket_prefix,b1"));
    }

    #[test]
    fn test_ai_orphans_report_filters_roles() {
        let ai = PendingVariant {
            file_sha256: "ai_one".to_string(),
            source: "family".to_string(),
            role: VariantRole::AiFrontV1,
            join_key: "k".to_string(),
            fastfoto_token: None,
            img_token: None,
            notes: vec![],
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
        };
        let mut other = ai.clone();
        other.file_sha256 = "proxy_one".to_string();
        other.role = VariantRole::ProxyBack;

        let out = render(|buf| write_ai_orphans_report(buf, &[ai, other]).unwrap());
        assert!(out.contains("ai_one"));
        assert!(!out.contains("proxy_one"));
    }

    #[test]
    fn test_overrides_report() {
        let rows = vec![
            OverrideOutcome {
                pending_sha256: "abc".to_string(),
                target_bucket_prefix: "aabbccddeeff".to_string(),
                applied: true,
                reason: None,
            },
            OverrideOutcome {
                pending_sha256: "def".to_string(),
                target_bucket_prefix: "000000000000".to_string(),
                applied: false,
                reason: Some("bucket_not_found".to_string()),
            },
        ];
        let out = render(|buf| write_overrides_report(buf, &rows).unwrap());
        assert!(out.contains("abc,aabbccddeeff,applied,"));
        assert!(out.contains("def,000000000000,skipped,bucket_not_found"));
    }
}
