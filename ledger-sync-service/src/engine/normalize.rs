//! Free-text repair for statement descriptions.
//!
//! Bank exports regularly arrive as UTF-8 that was decoded as Latin-1 or
//! Windows-1252 somewhere upstream (`ComisiÃ³n` instead of `Comisión`).
//! Descriptions are repaired, folded to unaccented ASCII and uppercased before
//! any rule sees them.

/// Description after repair and folding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    /// Some characters could not be recovered.
    pub lossy: bool,
}

/// Known two-character mojibake sequences, applied when a full re-decode is
/// not possible because the text mixes clean and damaged segments.
const REPLACEMENTS: &[(&str, &str)] = &[
    ("Ã¡", "á"),
    ("Ã©", "é"),
    ("Ã\u{AD}", "í"),
    ("Ã³", "ó"),
    ("Ãº", "ú"),
    ("Ã±", "ñ"),
    ("Ã¼", "ü"),
    ("Ã\u{81}", "Á"),
    ("Ã‰", "É"),
    ("Ã\u{8D}", "Í"),
    ("Ã“", "Ó"),
    ("Ãš", "Ú"),
    ("Ã‘", "Ñ"),
    ("Ãœ", "Ü"),
    ("Â°", "°"),
    ("Â", ""),
];

pub fn normalize(raw: &str) -> NormalizedText {
    let repaired = repair(raw);
    let lossy = repaired.contains('\u{FFFD}') || repaired.contains('Ã');

    let folded: String = repaired.chars().map(fold_char).collect();
    let text = folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();

    NormalizedText { text, lossy }
}

fn repair(raw: &str) -> String {
    if !raw.contains('Ã') && !raw.contains('Â') {
        return raw.to_string();
    }

    if let Some(decoded) = redecode(raw) {
        return decoded;
    }

    REPLACEMENTS
        .iter()
        .fold(raw.to_string(), |acc, (from, to)| acc.replace(from, to))
}

/// Re-encode as Windows-1252 and decode as UTF-8. Returns `None` when some
/// character has no Windows-1252 form or the bytes are not valid UTF-8.
fn redecode(raw: &str) -> Option<String> {
    let (bytes, _, unmappable) = encoding_rs::WINDOWS_1252.encode(raw);
    if unmappable {
        return None;
    }
    String::from_utf8(bytes.into_owned()).ok()
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'Á' | 'À' | 'Ä' | 'Â' => 'A',
        'É' | 'È' | 'Ë' | 'Ê' => 'E',
        'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
        'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
        'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
        'Ñ' => 'N',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_is_folded_and_collapsed() {
        let n = normalize("  Depósito   en efectivo ");
        assert_eq!(n.text, "DEPOSITO EN EFECTIVO");
        assert!(!n.lossy);
    }

    #[test]
    fn test_latin1_mojibake_is_redecoded() {
        let n = normalize("ComisiÃ³n Transferencia");
        assert_eq!(n.text, "COMISION TRANSFERENCIA");
        assert!(!n.lossy);
    }

    #[test]
    fn test_windows1252_mojibake_is_redecoded() {
        // "RECEPCIÓN" encoded as UTF-8 then read as Windows-1252
        let n = normalize("(NB) RECEPCIÃ“N de cuenta: 123");
        assert_eq!(n.text, "(NB) RECEPCION DE CUENTA: 123");
    }

    #[test]
    fn test_mixed_text_falls_back_to_table() {
        // The clean "ñ" cannot be re-decoded, so the table repairs the rest.
        let n = normalize("Aplicación de Tasas ComisiÃ³n año");
        assert_eq!(n.text, "APLICACION DE TASAS COMISION ANO");
        assert!(!n.lossy);
    }

    #[test]
    fn test_unencodable_character_falls_back_to_table() {
        let n = normalize("ComisiÃ³n ✓ Transferencia");
        assert_eq!(n.text, "COMISION ✓ TRANSFERENCIA");
        assert!(!n.lossy);
    }

    #[test]
    fn test_unrecoverable_text_is_marked_lossy() {
        let n = normalize("Dep\u{FFFD}sito en efectivo");
        assert!(n.lossy);
        assert_eq!(n.text, "DEP\u{FFFD}SITO EN EFECTIVO");
    }
}
