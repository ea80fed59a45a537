use dxrt_common::TextureImage;

use crate::AssetError;

const DARK: [u8; 4] = [0x00, 0x00, 0x00, 0xFF];
const LIGHT: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// RGBA8 checkerboard with `cells` squares along each axis.
///
/// A cell is dark when its column and row parities match.
pub fn checkerboard(width: u32, height: u32, cells: u32) -> Result<TextureImage, AssetError> {
    if width == 0 || height == 0 {
        return Err(AssetError::InvalidTexture(format!(
            "checkerboard must be non-empty, got {width}x{height}"
        )));
    }
    if TextureImage::byte_len(width, height, TextureImage::BYTES_PER_PIXEL).is_none() {
        return Err(AssetError::InvalidTexture(format!(
            "{width}x{height} checkerboard exceeds the {} texel limit",
            TextureImage::MAX_DIMENSION
        )));
    }
    if cells == 0 || cells > width || cells > height {
        return Err(AssetError::InvalidTexture(format!(
            "{cells} cells do not fit a {width}x{height} checkerboard"
        )));
    }

    Ok(fill(width, height, cells))
}

/// The 256x256, 8x8-cell board drawn on the textured triangle.
pub fn default_checkerboard() -> TextureImage {
    fill(256, 256, 8)
}

fn fill(width: u32, height: u32, cells: u32) -> TextureImage {
    let cell_width = width / cells;
    let cell_height = height / cells;
    let mut pixels = Vec::with_capacity(
        width as usize * height as usize * TextureImage::BYTES_PER_PIXEL as usize,
    );

    for y in 0..height {
        for x in 0..width {
            let i = x / cell_width;
            let j = y / cell_height;
            let texel = if i % 2 == j % 2 { DARK } else { LIGHT };
            pixels.extend_from_slice(&texel);
        }
    }

    TextureImage {
        width,
        height,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_size_and_alpha() {
        let img = checkerboard(64, 32, 4).unwrap();
        assert_eq!(img.pixels.len(), 64 * 32 * 4);
        assert!(img.pixels.chunks(4).all(|px| px[3] == 0xFF));
    }

    #[test]
    fn cells_alternate() {
        // 16px cells
        let img = checkerboard(64, 64, 4).unwrap();
        assert_eq!(img.pixel(0, 0), Some(DARK));
        assert_eq!(img.pixel(15, 15), Some(DARK));
        assert_eq!(img.pixel(16, 0), Some(LIGHT));
        assert_eq!(img.pixel(0, 16), Some(LIGHT));
        assert_eq!(img.pixel(16, 16), Some(DARK));
        assert_eq!(img.pixel(63, 0), Some(LIGHT));
    }

    #[test]
    fn default_board_matches_original_dimensions() {
        let img = default_checkerboard();
        assert_eq!((img.width, img.height), (256, 256));
        assert_eq!(img.pixel(31, 31), Some(DARK));
        assert_eq!(img.pixel(32, 31), Some(LIGHT));
    }

    #[test]
    fn rejects_degenerate_boards() {
        assert!(checkerboard(0, 16, 2).is_err());
        assert!(checkerboard(16, 16, 0).is_err());
        assert!(checkerboard(4, 4, 8).is_err());
    }

    #[test]
    fn rejects_boards_beyond_texture_limits() {
        let err = checkerboard(65536, 65536, 8).unwrap_err();
        assert!(matches!(err, AssetError::InvalidTexture(_)));
    }
}
