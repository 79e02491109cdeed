//! Resolves `{{tag}}` templates against channel/video context (spec §4.2).
//!
//! Core tags (`channel_id`, `channel_name`, `video_id`, `video_title`,
//! `video_url`) resolve immediately. Tags reserved for the post-processor
//! (`author`, `day`, `month`, `year`, `director`, `domain`) are passed
//! through unchanged, but only once the post-processor binary has been
//! verified reachable on the search path — otherwise resolution fails hard,
//! matching the teacher's "fail loud, never silently degrade" style in
//! `handlers.rs`'s URL validation.

use crate::models::{Channel, Video};

const POSTPROCESSOR_TAGS: &[&str] = &["author", "day", "month", "year", "director", "domain"];

pub(crate) fn postprocessor_on_path(postprocessor_bin: &str) -> bool {
    which(postprocessor_bin).is_some()
}

/// Minimal `which`-style executable search-path probe, mirroring the
/// teacher's approach of calling the binary and checking the result rather
/// than depending on a `which` crate.
fn which(bin: &str) -> Option<std::path::PathBuf> {
    if std::path::Path::new(bin).is_absolute() {
        return std::path::Path::new(bin).is_file().then(|| bin.into());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}

struct Tag<'a> {
    name: &'a str,
    start: usize,
    end: usize,
}

fn extract_tags(template: &str) -> anyhow::Result<Vec<Tag<'_>>> {
    let mut tags = Vec::new();
    let mut rest = template;
    let mut base_offset = 0usize;

    loop {
        let Some(open_rel) = rest.find("{{") else {
            if rest.contains("}}") {
                anyhow::bail!("mismatched '}}' in template '{template}'");
            }
            break;
        };
        let after_open = &rest[open_rel + 2..];
        let Some(close_rel) = after_open.find("}}") else {
            anyhow::bail!("mismatched '{{' in template '{template}'");
        };

        let name_start = base_offset + open_rel + 2;
        let name_end = name_start + close_rel;
        let name = template[name_start..name_end].trim();

        tags.push(Tag {
            name,
            start: base_offset + open_rel,
            end: name_end + 2,
        });

        base_offset = name_end + 2;
        rest = &template[base_offset..];
    }

    Ok(tags)
}

/// Resolve a template string. `video` is `None` for channel-level templates
/// (spec §4.9 step 1: video-level templates are deferred per item).
pub(crate) fn resolve(
    template: &str,
    channel: &Channel,
    video: Option<&Video>,
    postprocessor_bin: &str,
) -> anyhow::Result<String> {
    let tags = extract_tags(template)?;
    let postprocessor_reachable = postprocessor_on_path(postprocessor_bin);

    let mut out = String::with_capacity(template.len());
    let mut cursor = 0usize;

    for tag in &tags {
        out.push_str(&template[cursor..tag.start]);
        let lower = tag.name.to_lowercase();

        match lower.as_str() {
            "channel_id" => out.push_str(&channel.id.to_string()),
            "channel_name" => out.push_str(&channel.name),
            "video_id" => {
                let v = video.ok_or_else(|| {
                    anyhow::anyhow!("tag 'video_id' requires video context but none was supplied")
                })?;
                if v.id == 0 {
                    anyhow::bail!("tag 'video_id' resolved to zero, missing required data");
                }
                out.push_str(&v.id.to_string());
            }
            "video_title" => {
                let v = video.ok_or_else(|| {
                    anyhow::anyhow!("tag 'video_title' requires video context but none was supplied")
                })?;
                out.push_str(&v.title);
            }
            "video_url" => {
                let v = video.ok_or_else(|| {
                    anyhow::anyhow!("tag 'video_url' requires video context but none was supplied")
                })?;
                out.push_str(&v.url);
            }
            other if POSTPROCESSOR_TAGS.contains(&other) => {
                if !postprocessor_reachable {
                    anyhow::bail!(
                        "tag '{{{{{}}}}}' is reserved for the post-processor, which is not reachable on the search path",
                        tag.name
                    );
                }
                out.push_str("{{");
                out.push_str(tag.name);
                out.push_str("}}");
            }
            _ => anyhow::bail!("unknown template tag '{{{{{}}}}}'", tag.name),
        }

        cursor = tag.end;
    }
    out.push_str(&template[cursor..]);

    let resolved_path = std::path::Path::new(&out);
    let absolute = if resolved_path.is_absolute() {
        out
    } else {
        std::env::current_dir()?
            .join(resolved_path)
            .to_string_lossy()
            .into_owned()
    };

    Ok(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, MetarrArgs, Settings, Video};

    fn test_channel() -> Channel {
        Channel {
            id: 42,
            name: "Dogs Daily".to_string(),
            settings: Settings::default(),
            metarr_args: MetarrArgs::default(),
            crawl_freq_secs: 3600,
            paused: false,
            last_scan: None,
            urls: vec![],
        }
    }

    #[test]
    fn resolves_core_tags() {
        let channel = test_channel();
        let mut video = Video::new(42, 1, "https://example.com/v".to_string());
        video.id = 7;
        video.title = "A Dog".to_string();

        let resolved = resolve(
            "{{ channel_name }}/{{video_id}}-{{ video_title }}",
            &channel,
            Some(&video),
            "definitely-not-on-path-xyz",
        )
        .expect("should resolve");

        assert!(resolved.ends_with("Dogs Daily/7-A Dog"));
    }

    #[test]
    fn unknown_tag_errors() {
        let channel = test_channel();
        let err = resolve("{{nonsense}}", &channel, None, "definitely-not-on-path-xyz").unwrap_err();
        assert!(err.to_string().contains("unknown template tag"));
    }

    #[test]
    fn mismatched_braces_error() {
        let channel = test_channel();
        assert!(resolve("{{channel_id", &channel, None, "x").is_err());
        assert!(resolve("channel_id}}", &channel, None, "x").is_err());
    }

    #[test]
    fn missing_video_context_errors() {
        let channel = test_channel();
        let err = resolve("{{video_id}}", &channel, None, "x").unwrap_err();
        assert!(err.to_string().contains("requires video context"));
    }

    #[test]
    fn postprocessor_tag_passthrough_requires_reachable_binary() {
        let channel = test_channel();
        assert!(resolve("{{author}}", &channel, None, "definitely-not-on-path-xyz").is_err());
    }

    #[test]
    fn idempotent_given_same_inputs() {
        let channel = test_channel();
        let mut video = Video::new(42, 1, "https://example.com/v".to_string());
        video.id = 7;
        video.title = "A Dog".to_string();
        let a = resolve("{{channel_name}}/{{video_id}}", &channel, Some(&video), "x").unwrap();
        let b = resolve("{{channel_name}}/{{video_id}}", &channel, Some(&video), "x").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn case_insensitive_tag_names() {
        let channel = test_channel();
        let resolved = resolve("{{CHANNEL_NAME}}", &channel, None, "x").unwrap();
        assert!(resolved.ends_with("Dogs Daily"));
    }
}
