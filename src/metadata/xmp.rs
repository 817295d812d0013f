//! XMP packets in JPEG, PNG and sidecar files
//!
//! - JPEG: APP1 segment with the `http://ns.adobe.com/xap/1.0/` header
//! - PNG: `iTXt` chunk with keyword `XML:com.adobe.xmp`, placed before `IEND`
//! - anything else: `<file name>.xmp` next to the image
//!
//! Existing XMP written by any tool is replaced, other segments and chunks are
//! kept byte for byte.

use img_parts::jpeg::{markers, Jpeg, JpegSegment};
use img_parts::png::{Png, PngChunk};
use img_parts::Bytes;
use std::fs;
use std::path::{Path, PathBuf};

use super::MetadataWriter;
use crate::error::{AppError, Result};

const JPEG_XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const PNG_XMP_KEYWORD: &[u8] = b"XML:com.adobe.xmp";
const PNG_ITXT: [u8; 4] = *b"iTXt";
const PNG_IEND: [u8; 4] = *b"IEND";
/// Largest payload an APP1 segment can carry after the XMP header
const JPEG_MAX_XMP: usize = 65_533 - JPEG_XMP_HEADER.len();

pub const SUBJECT_TAG: &str = "AI Generated Description";

#[derive(Debug, Clone)]
pub struct XmpWriter {
    creator_tool: String,
}

impl XmpWriter {
    pub fn new(creator_tool: impl Into<String>) -> Self {
        Self {
            creator_tool: creator_tool.into(),
        }
    }

    pub fn packet(&self, description: &str) -> String {
        format!(
            r#"<?xpacket begin="{}" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
    xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:xmp="http://ns.adobe.com/xap/1.0/">
   <dc:description>
    <rdf:Alt>
     <rdf:li xml:lang="x-default">{}</rdf:li>
    </rdf:Alt>
   </dc:description>
   <dc:subject>
    <rdf:Bag>
     <rdf:li>{}</rdf:li>
    </rdf:Bag>
   </dc:subject>
   <xmp:CreatorTool>{}</xmp:CreatorTool>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#,
            '\u{feff}',
            escape(description),
            SUBJECT_TAG,
            escape(&self.creator_tool)
        )
    }

    fn write_jpeg(&self, image: &Path, packet: &str) -> Result<()> {
        if packet.len() > JPEG_MAX_XMP {
            return Err(AppError::MetadataWrite(format!(
                "XMP packet of {} bytes does not fit in a JPEG segment",
                packet.len()
            )));
        }

        let mut jpeg = Jpeg::from_bytes(read_bytes(image)?).map_err(|e| write_error(image, e))?;

        let mut contents = Vec::with_capacity(JPEG_XMP_HEADER.len() + packet.len());
        contents.extend_from_slice(JPEG_XMP_HEADER);
        contents.extend_from_slice(packet.as_bytes());
        let segment = JpegSegment::new_with_contents(markers::APP1, Bytes::from(contents));

        let segments = jpeg.segments_mut();
        segments.retain(|s| !is_jpeg_xmp(s));
        // after JFIF/EXIF headers
        let position = segments
            .iter()
            .position(|s| s.marker() != markers::APP0 && s.marker() != markers::APP1)
            .unwrap_or(segments.len());
        segments.insert(position, segment);

        let mut encoded = Vec::new();
        jpeg.encoder()
            .write_to(&mut encoded)
            .map_err(|e| write_error(image, e))?;
        write_atomically(image, &encoded)
    }

    fn write_png(&self, image: &Path, packet: &str) -> Result<()> {
        let mut png = Png::from_bytes(read_bytes(image)?).map_err(|e| write_error(image, e))?;

        let mut contents = Vec::with_capacity(PNG_XMP_KEYWORD.len() + 5 + packet.len());
        contents.extend_from_slice(PNG_XMP_KEYWORD);
        // keyword terminator, uncompressed, method 0, empty language, empty translation
        contents.extend_from_slice(&[0, 0, 0, 0, 0]);
        contents.extend_from_slice(packet.as_bytes());
        let chunk = PngChunk::new(PNG_ITXT, Bytes::from(contents));

        let chunks = png.chunks_mut();
        chunks.retain(|c| !is_png_xmp(c));
        let position = chunks
            .iter()
            .position(|c| c.kind() == PNG_IEND)
            .unwrap_or(chunks.len());
        chunks.insert(position, chunk);

        let mut encoded = Vec::new();
        png.encoder()
            .write_to(&mut encoded)
            .map_err(|e| write_error(image, e))?;
        write_atomically(image, &encoded)
    }

    fn read_jpeg(&self, image: &Path) -> Result<Option<String>> {
        let jpeg = Jpeg::from_bytes(read_bytes(image)?).map_err(|e| write_error(image, e))?;
        Ok(jpeg
            .segments()
            .iter()
            .find(|s| is_jpeg_xmp(s))
            .map(|s| String::from_utf8_lossy(&s.contents()[JPEG_XMP_HEADER.len()..]).to_string())
            .and_then(|packet| extract_description(&packet)))
    }

    fn read_png(&self, image: &Path) -> Result<Option<String>> {
        let png = Png::from_bytes(read_bytes(image)?).map_err(|e| write_error(image, e))?;
        Ok(png
            .chunks()
            .iter()
            .find(|c| is_png_xmp(c))
            .map(|c| String::from_utf8_lossy(c.contents()).to_string())
            .and_then(|text| extract_description(&text)))
    }
}

impl MetadataWriter for XmpWriter {
    fn write_description(&self, image: &Path, description: &str) -> Result<()> {
        let packet = self.packet(description);
        match container(image) {
            Container::Jpeg => self.write_jpeg(image, &packet),
            Container::Png => self.write_png(image, &packet),
            Container::Sidecar => {
                let sidecar = sidecar_path(image);
                fs::write(&sidecar, packet).map_err(|e| write_error(&sidecar, e))
            }
        }?;
        tracing::debug!("Wrote XMP description for {}", image.display());
        Ok(())
    }

    fn read_description(&self, image: &Path) -> Result<Option<String>> {
        match container(image) {
            Container::Jpeg => self.read_jpeg(image),
            Container::Png => self.read_png(image),
            Container::Sidecar => {
                let sidecar = sidecar_path(image);
                if !sidecar.exists() {
                    return Ok(None);
                }
                let text = fs::read_to_string(&sidecar).map_err(|e| write_error(&sidecar, e))?;
                Ok(extract_description(&text))
            }
        }
    }
}

enum Container {
    Jpeg,
    Png,
    Sidecar,
}

fn container(image: &Path) -> Container {
    match image
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => Container::Jpeg,
        Some("png") => Container::Png,
        _ => Container::Sidecar,
    }
}

/// `photo.gif` → `photo.gif.xmp`
pub fn sidecar_path(image: &Path) -> PathBuf {
    let mut name = image.file_name().unwrap_or_default().to_os_string();
    name.push(".xmp");
    image.with_file_name(name)
}

fn is_jpeg_xmp(segment: &JpegSegment) -> bool {
    segment.marker() == markers::APP1 && segment.contents().starts_with(JPEG_XMP_HEADER)
}

fn is_png_xmp(chunk: &PngChunk) -> bool {
    let contents = chunk.contents();
    chunk.kind() == PNG_ITXT
        && contents.starts_with(PNG_XMP_KEYWORD)
        && contents.get(PNG_XMP_KEYWORD.len()) == Some(&0)
}

fn read_bytes(image: &Path) -> Result<Bytes> {
    fs::read(image)
        .map(Bytes::from)
        .map_err(|e| write_error(image, e))
}

/// Write next to the target, then rename over it
fn write_atomically(image: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = image.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = image.with_file_name(tmp_name);

    if let Err(e) = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, image)) {
        let _ = fs::remove_file(&tmp);
        return Err(write_error(image, e));
    }
    Ok(())
}

fn write_error(path: &Path, err: impl std::fmt::Display) -> AppError {
    AppError::MetadataWrite(format!("{}: {}", path.display(), err))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn extract_description(packet: &str) -> Option<String> {
    let section_start = packet.find("<dc:description>")?;
    let section = &packet[section_start..];
    let open = r#"<rdf:li xml:lang="x-default">"#;
    let start = section.find(open)? + open.len();
    let end = section[start..].find("</rdf:li>")? + start;
    Some(unescape(&section[start..end]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn writer() -> XmpWriter {
        XmpWriter::new("image-describer test")
    }

    fn fixture(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(8, 8, Rgb([20, 120, 220]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn jpeg_round_trip_and_still_decodes() {
        let dir = TempDir::new().unwrap();
        let path = fixture(dir.path(), "sky.jpg");

        writer().write_description(&path, "Blue sky & <clouds>").unwrap();

        assert_eq!(
            writer().read_description(&path).unwrap().as_deref(),
            Some("Blue sky & <clouds>")
        );
        assert!(image::open(&path).is_ok());
        assert!(!dir.path().join("sky.jpg.tmp").exists());
    }

    #[test]
    fn rewriting_replaces_the_previous_packet() {
        let dir = TempDir::new().unwrap();
        let path = fixture(dir.path(), "sky.png");

        writer().write_description(&path, "first").unwrap();
        writer().write_description(&path, "second").unwrap();

        assert_eq!(writer().read_description(&path).unwrap().as_deref(), Some("second"));
        let png = Png::from_bytes(read_bytes(&path).unwrap()).unwrap();
        assert_eq!(png.chunks().iter().filter(|c| is_png_xmp(c)).count(), 1);
        assert_eq!(png.chunks().last().map(|c| c.kind()), Some(PNG_IEND));
        assert!(image::open(&path).is_ok());
    }

    #[test]
    fn other_formats_get_a_sidecar() {
        let dir = TempDir::new().unwrap();
        let path = fixture(dir.path(), "sky.bmp");
        let original = fs::read(&path).unwrap();

        writer().write_description(&path, "A bitmap").unwrap();

        assert_eq!(fs::read(&path).unwrap(), original);
        let sidecar = dir.path().join("sky.bmp.xmp");
        let text = fs::read_to_string(&sidecar).unwrap();
        assert!(text.contains(SUBJECT_TAG));
        assert!(text.contains("image-describer test"));
        assert_eq!(writer().read_description(&path).unwrap().as_deref(), Some("A bitmap"));
    }

    #[test]
    fn corrupt_jpeg_is_metadata_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jpg");
        fs::write(&path, b"not a jpeg").unwrap();
        assert!(matches!(
            writer().write_description(&path, "x").unwrap_err(),
            AppError::MetadataWrite(_)
        ));
    }

    #[test]
    fn oversized_description_rejected_for_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = fixture(dir.path(), "big.jpg");
        let long = "x".repeat(70_000);
        assert!(matches!(
            writer().write_description(&path, &long).unwrap_err(),
            AppError::MetadataWrite(_)
        ));
    }
}
