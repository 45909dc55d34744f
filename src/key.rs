//! Storage key and public URL construction.

use crate::attachment::{Attachment, Style};
use crate::config::StorageConfig;

/// Well-known host serving bucket contents when no alias is configured.
pub const STORAGE_HOST: &str = "commondatastorage.googleapis.com";

/// Compute the storage key for `style`.
///
/// Naming is delegated to the attachment's interpolation; any leading
/// separators are stripped, since object keys never begin with `/`.
#[must_use]
pub fn key_for(attachment: &dyn Attachment, style: &Style) -> String {
    attachment.path(style).trim_start_matches('/').to_string()
}

/// Build the public URL for `style`.
///
/// Pure and deterministic: `{protocol}://{host}/{bucket}/{key}`, where the
/// host is the configured alias or [`STORAGE_HOST`]. Cheap enough to
/// recompute on every call, so nothing is cached.
#[must_use]
pub fn url_for(attachment: &dyn Attachment, style: &Style, config: &StorageConfig) -> String {
    let host = config.host_alias.as_deref().unwrap_or(STORAGE_HOST);
    format!(
        "{}://{}/{}/{}",
        config.protocol().scheme(),
        host,
        config.bucket.name_for(attachment),
        key_for(attachment, style)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Permissions, Protocol};

    struct FixedAttachment {
        pattern: String,
    }

    impl Attachment for FixedAttachment {
        fn styles(&self) -> Vec<Style> {
            vec![Style::new("original")]
        }

        fn default_style(&self) -> Style {
            Style::new("original")
        }

        fn path(&self, style: &Style) -> String {
            self.pattern.replace(":style", style.as_str())
        }
    }

    fn attachment(pattern: &str) -> FixedAttachment {
        FixedAttachment {
            pattern: pattern.to_string(),
        }
    }

    #[test]
    fn test_key_strips_leading_separator() {
        let att = attachment("/photos/1/:style.jpg");
        let key = key_for(&att, &Style::new("thumb"));
        assert_eq!(key, "photos/1/thumb.jpg");
    }

    #[test]
    fn test_key_without_separator_is_untouched() {
        let att = attachment("photos/1/:style.jpg");
        assert_eq!(key_for(&att, &Style::new("thumb")), "photos/1/thumb.jpg");
    }

    #[test]
    fn test_url_for_public_read_uses_http() {
        let att = attachment("photos/1/:style.jpg");
        let config = StorageConfig::new("assets");
        assert_eq!(
            url_for(&att, &Style::new("original"), &config),
            format!("http://{STORAGE_HOST}/assets/photos/1/original.jpg")
        );
    }

    #[test]
    fn test_url_for_private_uses_https() {
        let att = attachment("photos/1/:style.jpg");
        let config = StorageConfig::new("assets").with_permissions(Permissions::Private);
        assert_eq!(
            url_for(&att, &Style::new("original"), &config),
            format!("https://{STORAGE_HOST}/assets/photos/1/original.jpg")
        );
    }

    #[test]
    fn test_url_honors_host_alias_and_protocol_override() {
        let att = attachment("photos/1/:style.jpg");
        let config = StorageConfig::new("assets")
            .with_host_alias("cdn.example.com")
            .with_protocol(Protocol::Https);
        assert_eq!(
            url_for(&att, &Style::new("original"), &config),
            "https://cdn.example.com/assets/photos/1/original.jpg"
        );
    }

    #[test]
    fn test_url_is_deterministic() {
        let att = attachment("photos/1/:style.jpg");
        let config = StorageConfig::new("assets");
        let style = Style::new("original");
        assert_eq!(
            url_for(&att, &style, &config),
            url_for(&att, &style, &config)
        );
    }
}
