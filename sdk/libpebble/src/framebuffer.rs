//! Framebuffer description returned by get-framebuffer

/// Layout of a pixel in the framebuffer
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb32 = 0,
    Bgr32 = 1,
}

/// Geometry of the framebuffer memory object
///
/// Written by the kernel into the caller's memory; the object itself comes
/// back as a handle.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramebufferInfo {
    pub width: u16,
    pub height: u16,
    /// Pixels per scanline
    pub stride: u16,
    pub pixel_format: PixelFormat,
}

impl FramebufferInfo {
    /// Size of the encoded form in bytes
    pub const ENCODED_LEN: usize = 8;

    /// Encode for copying into user memory
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut bytes = [0u8; Self::ENCODED_LEN];
        bytes[0..2].copy_from_slice(&self.width.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.height.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.stride.to_le_bytes());
        bytes[6] = self.pixel_format as u8;
        bytes
    }

    /// Decode what the kernel wrote
    pub fn from_bytes(bytes: &[u8; Self::ENCODED_LEN]) -> Option<Self> {
        let pixel_format = match bytes[6] {
            0 => PixelFormat::Rgb32,
            1 => PixelFormat::Bgr32,
            _ => return None,
        };
        Some(Self {
            width: u16::from_le_bytes([bytes[0], bytes[1]]),
            height: u16::from_le_bytes([bytes[2], bytes[3]]),
            stride: u16::from_le_bytes([bytes[4], bytes[5]]),
            pixel_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_pixel_format_rejected() {
        let mut bytes = FramebufferInfo {
            width: 1024,
            height: 768,
            stride: 1024,
            pixel_format: PixelFormat::Bgr32,
        }
        .to_bytes();
        assert_eq!(FramebufferInfo::from_bytes(&bytes).map(|info| info.height), Some(768));
        bytes[6] = 9;
        assert_eq!(FramebufferInfo::from_bytes(&bytes), None);
    }
}
