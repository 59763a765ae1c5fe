//! Loads device frame geometry from a skin folder.
//!
//! A skin folder holds the frame artwork and a `layout.ini` key-value file
//! describing it in the device's native orientation:
//!
//! ```text
//! frame.width=1348
//! frame.height=2764
//! display.x=86
//! display.y=182
//! display.width=1176
//! display.height=2400
//! display.corner_radius=64
//! ```

use std::path::{Path, PathBuf};

use mirror_core::domain::display::{Rect, Size};
use thiserror::Error;

use crate::application::skin::SkinDefinition;
use crate::infrastructure::storage::kvfile::{read_key_value_file, KeyValueError, KeyValues};

pub const LAYOUT_FILE: &str = "layout.ini";

/// Errors produced while loading a skin.
#[derive(Debug, Error)]
pub enum SkinError {
    #[error(transparent)]
    File(#[from] KeyValueError),

    #[error("{file} does not define a valid {key}")]
    InvalidKey { file: PathBuf, key: &'static str },

    /// The display area is not inside the frame.
    #[error("{file}: display {display:?} does not fit in a {frame:?} frame")]
    DisplayOutsideFrame { file: PathBuf, display: Rect, frame: Size },
}

/// Reads `layout.ini` from `folder`.
///
/// # Errors
///
/// Returns [`SkinError`] if the file is missing, a dimension is missing or
/// not a number, or the display does not fit inside the frame.
pub fn load_skin(folder: &Path) -> Result<SkinDefinition, SkinError> {
    let file = folder.join(LAYOUT_FILE);
    let values = read_key_value_file(&file)?;
    parse_layout(&values, &file)
}

fn parse_layout(values: &KeyValues, file: &Path) -> Result<SkinDefinition, SkinError> {
    let invalid = |key: &'static str| SkinError::InvalidKey {
        file: file.to_path_buf(),
        key,
    };
    let positive = |key: &'static str| values.get_parsed::<u32>(key).filter(|v| *v > 0).ok_or_else(|| invalid(key));
    let offset = |key: &'static str| values.get_parsed::<i32>(key).filter(|v| *v >= 0).ok_or_else(|| invalid(key));

    let frame_size = Size::new(positive("frame.width")?, positive("frame.height")?);
    let display_rect = Rect::new(
        offset("display.x")?,
        offset("display.y")?,
        positive("display.width")?,
        positive("display.height")?,
    );
    let corner_radius = match values.get("display.corner_radius") {
        Some(_) => values
            .get_parsed::<u32>("display.corner_radius")
            .ok_or_else(|| invalid("display.corner_radius"))?,
        None => 0,
    };

    let fits = display_rect.right() <= frame_size.width as i32 && display_rect.bottom() <= frame_size.height as i32;
    if !fits {
        return Err(SkinError::DisplayOutsideFrame {
            file: file.to_path_buf(),
            display: display_rect,
            frame: frame_size,
        });
    }

    Ok(SkinDefinition {
        frame_size,
        display_rect,
        corner_radius,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const LAYOUT: &str = "frame.width=1348\nframe.height=2764\ndisplay.x=86\ndisplay.y=182\n\
                          display.width=1176\ndisplay.height=2400\ndisplay.corner_radius=64\n";

    #[test]
    fn test_parse_layout_reads_frame_and_display() {
        // Act
        let skin = parse_layout(&KeyValues::parse(LAYOUT), Path::new("layout.ini")).unwrap();

        // Assert
        assert_eq!(skin.frame_size, Size::new(1348, 2764));
        assert_eq!(skin.display_rect, Rect::new(86, 182, 1176, 2400));
        assert_eq!(skin.corner_radius, 64);
    }

    #[test]
    fn test_display_outside_frame_is_rejected() {
        let layout = LAYOUT.replace("display.x=86", "display.x=400");
        let result = parse_layout(&KeyValues::parse(&layout), Path::new("layout.ini"));
        assert!(matches!(result, Err(SkinError::DisplayOutsideFrame { .. })));
    }

    #[test]
    fn test_missing_dimension_is_rejected() {
        let layout = LAYOUT.replace("frame.height=2764\n", "");
        let result = parse_layout(&KeyValues::parse(&layout), Path::new("layout.ini"));
        assert!(matches!(result, Err(SkinError::InvalidKey { key: "frame.height", .. })));
    }

    #[test]
    fn test_load_skin_reads_layout_file_from_folder() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("mirror_skin_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(LAYOUT_FILE), LAYOUT).unwrap();

        // Act
        let skin = load_skin(&dir);
        let missing = load_skin(&dir.join("nope"));

        // Assert
        assert_eq!(skin.unwrap().corner_radius, 64);
        assert!(matches!(missing, Err(SkinError::File(_))));

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }
}
