//! HTML card template.
//!
//! The document is self-contained: the stylesheet is embedded and missing
//! photos use an inline SVG, so the exporter never needs the network except
//! for absolute asset URLs already present in the data.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;

use crate::people::{InstitutionProfile, PersonKind, PersonRecord};

pub const PLACEHOLDER_NAME: &str = "Sin nombre";
pub const PLACEHOLDER_CODE: &str = "SIN CÓDIGO";

const SILHOUETTE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 60 75"><rect width="60" height="75" fill="#d9dee5"/><circle cx="30" cy="27" r="13" fill="#9aa5b1"/><path d="M6 75c0-15 11-25 24-25s24 10 24 25z" fill="#9aa5b1"/></svg>"##;

lazy_static! {
    static ref PLACEHOLDER_PHOTO: String =
        format!("data:image/svg+xml;base64,{}", BASE64.encode(SILHOUETTE_SVG));
}

const STYLESHEET: &str = r#"
* { box-sizing: border-box; margin: 0; padding: 0; }
body { font-family: "DejaVu Sans", Arial, sans-serif; color: #1f2933; }
.sheet { display: flex; flex-wrap: wrap; align-content: flex-start; gap: 4mm; padding: 8mm; width: 210mm; }
.carnet { width: 85.6mm; height: 54mm; border-radius: 3mm; overflow: hidden; display: flex; flex-direction: column; background: #ffffff; border: 0.3mm solid #c5ccd6; page-break-inside: avoid; break-inside: avoid; }
.carnet.student header { background: #1d4ed8; }
.carnet.teacher header { background: #047857; }
.carnet header { color: #ffffff; display: flex; align-items: center; gap: 2mm; padding: 1.5mm 3mm; height: 11mm; }
.carnet header img { height: 8mm; width: 8mm; object-fit: contain; }
.carnet header .institution { font-size: 2.6mm; font-weight: bold; line-height: 1.1; }
.carnet header .year { font-size: 2mm; opacity: 0.85; }
.carnet .body { display: flex; gap: 3mm; padding: 2.5mm 3mm; flex: 1; }
.carnet .photo { width: 20mm; height: 25mm; object-fit: cover; border-radius: 1mm; background: #d9dee5; }
.carnet .details { display: flex; flex-direction: column; gap: 1mm; font-size: 2.5mm; }
.carnet .name { font-size: 3.2mm; font-weight: bold; text-transform: uppercase; }
.carnet .role { font-size: 2.2mm; letter-spacing: 0.4mm; color: #52606d; }
.carnet .code { font-family: "DejaVu Sans Mono", monospace; font-size: 3mm; margin-top: auto; }
.carnet.degraded .name, .carnet.degraded .code { color: #9aa5b1; }
"#;

/// Escape text for HTML element content and attribute values.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Photo references that can be embedded as-is.
fn is_absolute(reference: &str) -> bool {
    reference.starts_with("https://")
        || reference.starts_with("http://")
        || reference.starts_with("data:image/")
}

/// Renders document chrome and per-person card fragments.
pub struct CardTemplate<'a> {
    institution: &'a InstitutionProfile,
    resolve_asset: &'a (dyn Fn(&str) -> String + Send + Sync),
}

impl<'a> CardTemplate<'a> {
    /// `resolve_asset` turns a storage-relative reference into an absolute URL.
    pub fn new(
        institution: &'a InstitutionProfile,
        resolve_asset: &'a (dyn Fn(&str) -> String + Send + Sync),
    ) -> Self {
        Self {
            institution,
            resolve_asset,
        }
    }

    fn asset_url(&self, reference: &str) -> String {
        if is_absolute(reference) {
            reference.to_string()
        } else {
            (self.resolve_asset)(reference.trim_start_matches('/'))
        }
    }

    pub fn document_start(&self, generated_at: DateTime<Utc>) -> String {
        format!(
            "<!DOCTYPE html>\n<html lang=\"es\">\n<head>\n<meta charset=\"utf-8\">\n<title>Carnets - {}</title>\n<meta name=\"generated-at\" content=\"{}\">\n<style>{}</style>\n</head>\n<body>\n<main class=\"sheet\">\n",
            escape_html(&self.institution.name),
            generated_at.to_rfc3339(),
            STYLESHEET
        )
    }

    pub fn document_end(&self) -> &'static str {
        "</main>\n</body>\n</html>\n"
    }

    /// One card. Missing name, code, or photo yield placeholder content and
    /// the `degraded` class instead of an error.
    pub fn card(&self, person: &PersonRecord) -> String {
        let name = non_blank(&person.full_name);
        let code = non_blank(&person.code);
        let photo = non_blank(&person.photo);
        let degraded = name.is_none() || code.is_none() || photo.is_none();

        if degraded {
            log::debug!("Rendering degraded carnet for {}", person.key());
        }

        let role = match person.kind {
            PersonKind::Student => "ESTUDIANTE",
            PersonKind::Teacher => "DOCENTE",
        };

        let photo_src = photo
            .map(|p| self.asset_url(p))
            .unwrap_or_else(|| PLACEHOLDER_PHOTO.clone());

        let logo = non_blank(&self.institution.logo)
            .map(|logo| format!("<img src=\"{}\" alt=\"\">", escape_html(&self.asset_url(logo))))
            .unwrap_or_default();

        let year = non_blank(&self.institution.school_year)
            .map(|year| format!("<div class=\"year\">{}</div>", escape_html(year)))
            .unwrap_or_default();

        let mut placement = Vec::new();
        if let Some(level) = person.level {
            placement.push(level.as_str().to_string());
        }
        if let Some(grade) = non_blank(&person.grade) {
            placement.push(format!("Grado {}", escape_html(grade)));
        }
        if let Some(section) = non_blank(&person.section) {
            placement.push(format!("Sección {}", escape_html(section)));
        }
        let placement = if placement.is_empty() {
            String::new()
        } else {
            format!("<div class=\"placement\">{}</div>", placement.join(" · "))
        };

        let document = non_blank(&person.document_number)
            .map(|doc| format!("<div class=\"document\">DNI {}</div>", escape_html(doc)))
            .unwrap_or_default();

        format!(
            concat!(
                "<article class=\"carnet {kind}{degraded}\" data-person=\"{key}\">",
                "<header>{logo}<div><div class=\"institution\">{institution}</div>{year}</div></header>",
                "<div class=\"body\"><img class=\"photo\" src=\"{photo}\" alt=\"\">",
                "<div class=\"details\"><div class=\"role\">{role}</div><div class=\"name\">{name}</div>",
                "{placement}{document}<div class=\"code\" data-qr=\"{code}\">{code}</div></div></div>",
                "</article>\n"
            ),
            kind = person.kind.as_str(),
            degraded = if degraded { " degraded" } else { "" },
            key = person.key(),
            logo = logo,
            institution = escape_html(&self.institution.name),
            year = year,
            photo = escape_html(&photo_src),
            role = role,
            name = escape_html(name.unwrap_or(PLACEHOLDER_NAME)),
            placement = placement,
            document = document,
            code = escape_html(code.unwrap_or(PLACEHOLDER_CODE)),
        )
    }
}

/// Number of cards in a rendered document.
pub fn count_cards(html: &str) -> usize {
    html.matches("<article class=\"carnet ").count()
}
