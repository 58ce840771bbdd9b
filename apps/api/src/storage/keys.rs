// Object key layout: sessions/<session_id>/<folder>/<file>.

use uuid::Uuid;

pub const PDFS: &str = "pdfs";
pub const IMAGES: &str = "images";
pub const DIAGRAMS: &str = "diagrams";

pub fn session_prefix(session_id: Uuid) -> String {
    format!("sessions/{session_id}/")
}

/// Builds a key under the session's folder, prefixed with a short unique id so two
/// uploads with the same filename do not collide.
pub fn session_key(session_id: Uuid, folder: &str, filename: &str) -> String {
    let unique = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}/{}-{}",
        session_prefix(session_id),
        folder,
        &unique[..8],
        sanitize_filename(filename)
    )
}

/// Destination key for a diagram promoted from an uploaded image.
pub fn diagram_key(session_id: Uuid, source_key: &str) -> String {
    let filename = source_key.rsplit('/').next().unwrap_or(source_key);
    format!("{}{}/{}", session_prefix(session_id), DIAGRAMS, filename)
}

/// Whether `key` lives under this session's prefix.
pub fn belongs_to_session(session_id: Uuid, key: &str) -> bool {
    key.starts_with(&session_prefix(session_id)) && !key.contains("..")
}

/// Keeps ASCII letters, digits, `.`, `-`, `_`; everything else becomes `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_layout() {
        let id = Uuid::new_v4();
        let key = session_key(id, PDFS, "Leaf Biology.pdf");
        assert!(key.starts_with(&format!("sessions/{id}/pdfs/")));
        assert!(key.ends_with("-Leaf_Biology.pdf"));
        assert!(belongs_to_session(id, &key));
    }

    #[test]
    fn test_sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\docs\\cell (1).png"), "cell__1_.png");
        assert_eq!(sanitize_filename(".."), "file");
    }

    #[test]
    fn test_diagram_key_reuses_filename() {
        let id = Uuid::new_v4();
        let key = diagram_key(id, &format!("sessions/{id}/images/ab12cd34-leaf.png"));
        assert_eq!(key, format!("sessions/{id}/diagrams/ab12cd34-leaf.png"));
    }

    #[test]
    fn test_foreign_keys_do_not_belong() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(!belongs_to_session(id, &format!("sessions/{other}/pdfs/x.pdf")));
        assert!(!belongs_to_session(id, &format!("sessions/{id}/../{other}/x.pdf")));
    }
}
