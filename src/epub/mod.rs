//! EPUB compiler. Packages title, author, chapter markup, and a cover image as EPUB 3
//! (mimetype, container, OPF, nav + NCX, cover page, one content document).

use crate::chapter::xml_escape;
use crate::model::file_name_of;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const CONTENT_FILE: &str = "chap_01.xhtml";
const CONTENT_LABEL: &str = "Content";
const LANGUAGE: &str = "en";
/// Fixed `dcterms:modified` value so repeated compiles stay byte-identical.
const MODIFIED: &str = "2024-01-01T00:00:00Z";

/// Errors from the EPUB compiler.
///
/// Maps to CLI exit code 3.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: book title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: book author is empty.")]
    EmptyAuthor,

    #[error("Cannot read cover image: {path}: {source}")]
    CoverRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// What goes into the package.
#[derive(Debug, Clone, Copy)]
pub struct BookContent<'a> {
    pub title: &'a str,
    pub author: &'a str,
    /// Concatenated chapter fragments, already in order.
    pub markup: &'a str,
}

struct Cover {
    file_name: String,
    media_type: &'static str,
    data: Vec<u8>,
}

/// Read the cover at `cover_path`, build the package, and write it to `output`.
pub fn compile_epub(
    content: &BookContent<'_>,
    cover_path: &Path,
    output: &Path,
) -> Result<PathBuf, EpubError> {
    validate(content)?;

    let data = std::fs::read(cover_path).map_err(|e| EpubError::CoverRead {
        path: cover_path.to_path_buf(),
        source: e,
    })?;
    let file_name = sanitize_file_name(&file_name_of(cover_path));
    let cover = Cover {
        media_type: image_media_type(&data, &file_name),
        file_name,
        data,
    };

    let path = output.to_path_buf();
    let file = std::fs::File::create(&path).map_err(|e| EpubError::CreateFile {
        path: path.clone(),
        source: e,
    })?;
    write_package(content, &cover, file)?;
    debug!(path = %path.display(), "EPUB file created");
    Ok(path)
}

fn validate(content: &BookContent<'_>) -> Result<(), EpubError> {
    if content.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    if content.author.trim().is_empty() {
        return Err(EpubError::EmptyAuthor);
    }
    Ok(())
}

fn write_package<W: Write + Seek>(
    content: &BookContent<'_>,
    cover: &Cover,
    sink: W,
) -> Result<(), EpubError> {
    let mut zip = ZipWriter::new(sink);

    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // Mimetype first, uncompressed.
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    write_opf(content, cover, &mut zip, options_deflate)?;
    write_nav_xhtml(&mut zip, options_deflate)?;
    write_ncx(content, &mut zip, options_deflate)?;
    write_cover_xhtml(content, cover, &mut zip, options_deflate)?;
    write_content_xhtml(content, &mut zip, options_deflate)?;

    zip.start_file(
        format!("{}images/{}", OEBPS_PREFIX, cover.file_name),
        options_deflate,
    )?;
    zip.write_all(&cover.data)?;

    zip.finish()?;
    Ok(())
}

/// Body of the content document: the book title followed by the chapter markup.
pub fn content_document(content: &BookContent<'_>) -> String {
    let title = xml_escape(content.title);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" lang="{lang}" xml:lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>{label}</title>
</head>
<body>
<h1>{title}</h1>
{markup}
</body>
</html>
"#,
        lang = LANGUAGE,
        label = CONTENT_LABEL,
        title = title,
        markup = content.markup.trim_end(),
    )
}

/// Stable identifier derived from the title.
fn identifier(content: &BookContent<'_>) -> String {
    format!("urn:bookgen:{}", slugify(content.title))
}

/// Lowercase, non-alphanumerics to `-`, collapsed and trimmed. Empty becomes "book".
pub fn slugify(title: &str) -> String {
    let mut s = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();
    while s.contains("--") {
        s = s.replace("--", "-");
    }
    s = s.trim_matches('-').to_string();
    if s.is_empty() {
        s = "book".to_string();
    }
    s
}

fn write_opf(
    content: &BookContent<'_>,
    cover: &Cover,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:language>{lang}</dc:language>
    <dc:creator>{creator}</dc:creator>
    <meta property="dcterms:modified">{modified}</meta>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="cover-img" href="images/{cover_href}" media-type="{cover_type}" properties="cover-image"/>
    <item id="cover" href="cover.xhtml" media-type="application/xhtml+xml"/>
    <item id="content" href="{content_file}" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="cover"/>
    <itemref idref="nav"/>
    <itemref idref="content"/>
  </spine>
  <guide>
    <reference type="cover" href="cover.xhtml" title="Cover"/>
  </guide>
</package>
"#,
        id = xml_escape(&identifier(content)),
        title = xml_escape(content.title),
        lang = LANGUAGE,
        creator = xml_escape(content.author),
        modified = MODIFIED,
        cover_href = xml_escape(&cover.file_name),
        cover_type = cover.media_type,
        content_file = CONTENT_FILE,
    );
    zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
    zip.write_all(opf.as_bytes())?;
    Ok(())
}

fn write_nav_xhtml(
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
      <li><a href="{}">{}</a></li>
    </ol>
  </nav>
</body>
</html>
"#,
        CONTENT_FILE, CONTENT_LABEL
    );
    zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(nav.as_bytes())?;
    Ok(())
}

fn write_ncx(
    content: &BookContent<'_>,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
  </head>
  <docTitle>
    <text>{title}</text>
  </docTitle>
  <navMap>
    <navPoint id="navpoint-1" playOrder="1">
      <navLabel><text>{label}</text></navLabel>
      <content src="{src}"/>
    </navPoint>
  </navMap>
</ncx>
"#,
        uid = xml_escape(&identifier(content)),
        title = xml_escape(content.title),
        label = CONTENT_LABEL,
        src = CONTENT_FILE,
    );
    zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
    zip.write_all(ncx.as_bytes())?;
    Ok(())
}

fn write_cover_xhtml(
    content: &BookContent<'_>,
    cover: &Cover,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let cover_xhtml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>Cover</title>
</head>
<body>
  <div style="text-align: center;">
    <img src="images/{}" alt="{}" style="max-width: 100%; height: auto;"/>
  </div>
</body>
</html>
"#,
        xml_escape(&cover.file_name),
        xml_escape(content.title)
    );
    zip.start_file(format!("{}cover.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(cover_xhtml.as_bytes())?;
    Ok(())
}

fn write_content_xhtml(
    content: &BookContent<'_>,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    zip.start_file(format!("{}{}", OEBPS_PREFIX, CONTENT_FILE), options)?;
    zip.write_all(content_document(content).as_bytes())?;
    Ok(())
}

/// Keep zip entry names plain: anything outside `[A-Za-z0-9._-]` becomes `_`.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Media type from magic bytes, then from the file extension. Defaults to PNG.
fn image_media_type(data: &[u8], file_name: &str) -> &'static str {
    if data.starts_with(b"\x89PNG") {
        return "image/png";
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    if data.starts_with(b"GIF8") {
        return "image/gif";
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return "image/webp";
    }
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/png",
    }
}

/// Run epubcheck on the given EPUB path. Requires epubcheck on PATH.
pub fn run_epubcheck(path: &Path) -> Result<(), String> {
    let output = std::process::Command::new("epubcheck")
        .arg(path)
        .output()
        .map_err(|e| {
            format!(
                "Could not run epubcheck: {}. Is epubcheck installed and on PATH?",
                e
            )
        })?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let msg = if stderr.is_empty() { stdout } else { stderr };
        Err(format!("epubcheck reported errors:\n{}", msg.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::read::ZipArchive;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-data";

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bookgen_epub_{}_{}", std::process::id(), name))
    }

    fn content<'a>(markup: &'a str) -> BookContent<'a> {
        BookContent {
            title: "Water for Rome",
            author: "A. Writer",
            markup,
        }
    }

    fn read_entry(zip: &mut ZipArchive<std::fs::File>, name: &str) -> Vec<u8> {
        let mut entry = zip.by_name(name).unwrap();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn rejects_empty_title_and_author() {
        let cover = temp_path("unused_cover.png");
        let out = temp_path("void.epub");
        let mut c = content("");
        c.title = " ";
        assert!(matches!(
            compile_epub(&c, &cover, &out),
            Err(EpubError::EmptyTitle)
        ));
        let mut c = content("");
        c.author = "";
        assert!(matches!(
            compile_epub(&c, &cover, &out),
            Err(EpubError::EmptyAuthor)
        ));
    }

    #[test]
    fn missing_cover_is_cover_read_error() {
        let err = compile_epub(
            &content("<p>x</p>"),
            Path::new("/nonexistent_dir_bookgen_xyz/cover.png"),
            &temp_path("nocover.epub"),
        )
        .unwrap_err();
        assert!(matches!(err, EpubError::CoverRead { .. }));
    }

    #[test]
    fn package_has_expected_entries_and_metadata() {
        let cover = temp_path("cover_entries.png");
        std::fs::write(&cover, PNG).unwrap();
        let out = temp_path("entries.epub");
        let markup = "<h2>Chapter 1: Origins</h2>\n<p>Water.</p>\n";
        let written = compile_epub(&content(markup), &cover, &out).unwrap();
        assert_eq!(written, out);

        let mut zip = ZipArchive::new(std::fs::File::open(&out).unwrap()).unwrap();
        let names: Vec<String> = zip.file_names().map(String::from).collect();
        assert_eq!(zip.by_index(0).unwrap().name(), "mimetype");
        for expected in [
            "META-INF/container.xml",
            "OEBPS/content.opf",
            "OEBPS/nav.xhtml",
            "OEBPS/toc.ncx",
            "OEBPS/cover.xhtml",
            "OEBPS/chap_01.xhtml",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
        let cover_entry = format!("OEBPS/images/{}", file_name_of(&cover));
        assert_eq!(read_entry(&mut zip, &cover_entry), PNG);

        let opf = String::from_utf8(read_entry(&mut zip, "OEBPS/content.opf")).unwrap();
        assert!(opf.contains("<dc:title>Water for Rome</dc:title>"));
        assert!(opf.contains("<dc:creator>A. Writer</dc:creator>"));
        assert!(opf.contains("<dc:language>en</dc:language>"));
        assert!(opf.contains("urn:bookgen:water-for-rome"));
        assert!(opf.contains(r#"media-type="image/png""#));
        assert_eq!(
            opf.matches(r#"<meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>"#)
                .count(),
            1
        );
        let metadata_end = opf.find("</metadata>").unwrap();
        assert!(opf.find("dcterms:modified").unwrap() < metadata_end);

        let nav = String::from_utf8(read_entry(&mut zip, "OEBPS/nav.xhtml")).unwrap();
        assert_eq!(nav.matches("<li>").count(), 1);
        assert!(nav.contains(r#"href="chap_01.xhtml""#));

        let doc = String::from_utf8(read_entry(&mut zip, "OEBPS/chap_01.xhtml")).unwrap();
        assert!(doc.contains("<h1>Water for Rome</h1>\n<h2>Chapter 1: Origins</h2>"));

        std::fs::remove_file(&out).ok();
        std::fs::remove_file(&cover).ok();
    }

    #[test]
    fn compiling_twice_yields_identical_content_and_cover() {
        let cover = temp_path("cover_twice.jpg");
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];
        std::fs::write(&cover, jpeg).unwrap();
        let markup = "<h2>Chapter 1: A</h2>\n<p>a</p>\n<h2>Chapter 2: B</h2>\n<p>b</p>\n";
        let out_a = temp_path("twice_a.epub");
        let out_b = temp_path("twice_b.epub");
        compile_epub(&content(markup), &cover, &out_a).unwrap();
        compile_epub(&content(markup), &cover, &out_b).unwrap();

        let mut a = ZipArchive::new(std::fs::File::open(&out_a).unwrap()).unwrap();
        let mut b = ZipArchive::new(std::fs::File::open(&out_b).unwrap()).unwrap();
        assert_eq!(
            read_entry(&mut a, "OEBPS/chap_01.xhtml"),
            read_entry(&mut b, "OEBPS/chap_01.xhtml")
        );
        let entry = format!("OEBPS/images/{}", file_name_of(&cover));
        assert_eq!(read_entry(&mut a, &entry), read_entry(&mut b, &entry));
        assert_eq!(read_entry(&mut a, &entry), jpeg);

        for p in [&out_a, &out_b, &cover] {
            std::fs::remove_file(p).ok();
        }
    }

    #[test]
    fn title_is_escaped_in_content_document() {
        let c = BookContent {
            title: "Pipes & <Arches>",
            author: "x",
            markup: "",
        };
        assert!(content_document(&c).contains("<h1>Pipes &amp; &lt;Arches&gt;</h1>"));
    }

    #[test]
    fn media_type_prefers_magic_bytes() {
        assert_eq!(image_media_type(PNG, "cover.jpg"), "image/png");
        assert_eq!(image_media_type(&[0xFF, 0xD8, 0xFF], "c.png"), "image/jpeg");
        assert_eq!(image_media_type(b"GIF89a", "c"), "image/gif");
        assert_eq!(image_media_type(b"????", "c.JPEG"), "image/jpeg");
        assert_eq!(image_media_type(b"????", "c"), "image/png");
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify(""), "book");
        assert_eq!(slugify("My  Story!"), "my-story");
        assert_eq!(slugify("  --  a  --  b  --  "), "a-b");
    }

    #[test]
    fn sanitize_file_name_replaces_odd_characters() {
        assert_eq!(sanitize_file_name("my cover (1).png"), "my_cover__1_.png");
    }
}
