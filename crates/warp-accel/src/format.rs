//! Image format descriptors
//!
//! An [`ImageFormat`] pairs a channel order with a channel data type, the same
//! two fields a compute runtime needs to lay out an image object. Formats are
//! usually deduced from the host pixel type (see [`ImageFormat::of`]) but can
//! be supplied explicitly when creating an image.

use crate::channel::{Channels, Pixel, Scalar};
use serde::{Deserialize, Serialize};

/// Order of the channels within one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// Single channel
    R,
    /// Two channels
    Rg,
    /// Three channels
    Rgb,
    /// Four channels
    Rgba,
}

impl ChannelOrder {
    /// Channel order for a channel count
    pub const fn from_channels(channels: Channels) -> Self {
        match channels {
            Channels::One => Self::R,
            Channels::Two => Self::Rg,
            Channels::Three => Self::Rgb,
            Channels::Four => Self::Rgba,
        }
    }

    /// Channel count of this order
    pub const fn channels(self) -> Channels {
        match self {
            Self::R => Channels::One,
            Self::Rg => Channels::Two,
            Self::Rgb => Channels::Three,
            Self::Rgba => Channels::Four,
        }
    }
}

impl std::fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelOrder::R => write!(f, "R"),
            ChannelOrder::Rg => write!(f, "RG"),
            ChannelOrder::Rgb => write!(f, "RGB"),
            ChannelOrder::Rgba => write!(f, "RGBA"),
        }
    }
}

/// Scalar data type of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Signed 8-bit integer
    SignedInt8,
    /// Signed 16-bit integer
    SignedInt16,
    /// Signed 32-bit integer
    SignedInt32,
    /// Unsigned 8-bit integer
    UnsignedInt8,
    /// Unsigned 16-bit integer
    UnsignedInt16,
    /// Unsigned 32-bit integer
    UnsignedInt32,
    /// IEEE 754 single precision
    Float32,
}

impl ChannelType {
    /// Size of one channel in bytes
    pub const fn size(self) -> usize {
        match self {
            Self::SignedInt8 | Self::UnsignedInt8 => 1,
            Self::SignedInt16 | Self::UnsignedInt16 => 2,
            Self::SignedInt32 | Self::UnsignedInt32 | Self::Float32 => 4,
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelType::SignedInt8 => "i8",
            ChannelType::SignedInt16 => "i16",
            ChannelType::SignedInt32 => "i32",
            ChannelType::UnsignedInt8 => "u8",
            ChannelType::UnsignedInt16 => "u16",
            ChannelType::UnsignedInt32 => "u32",
            ChannelType::Float32 => "f32",
        };
        f.write_str(name)
    }
}

/// Pixel format of an image object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageFormat {
    /// Channel order
    pub order: ChannelOrder,
    /// Channel data type
    pub channel_type: ChannelType,
}

impl ImageFormat {
    /// Create a format from its parts
    pub const fn new(order: ChannelOrder, channel_type: ChannelType) -> Self {
        Self { order, channel_type }
    }

    /// Deduce the format matching a host pixel type
    pub const fn of<P: Pixel>() -> Self {
        Self {
            order: ChannelOrder::from_channels(P::CHANNELS),
            channel_type: <P::Scalar as Scalar>::CHANNEL_TYPE,
        }
    }

    /// Number of channels per pixel
    pub const fn channels(&self) -> Channels {
        self.order.channels()
    }

    /// Size of one pixel in bytes
    pub const fn pixel_size(&self) -> usize {
        self.order.channels().count() * self.channel_type.size()
    }

    /// Whether host pixels of type `P` can be transferred into this format
    /// without conversion
    pub fn matches<P: Pixel>(&self) -> bool {
        *self == Self::of::<P>()
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.order, self.channel_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduced_formats() {
        assert_eq!(
            ImageFormat::of::<f32>(),
            ImageFormat::new(ChannelOrder::R, ChannelType::Float32)
        );
        assert_eq!(
            ImageFormat::of::<[u8; 4]>(),
            ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnsignedInt8)
        );
        assert_eq!(
            ImageFormat::of::<[i16; 2]>(),
            ImageFormat::new(ChannelOrder::Rg, ChannelType::SignedInt16)
        );
    }

    #[test]
    fn test_pixel_size() {
        assert_eq!(ImageFormat::of::<[f32; 3]>().pixel_size(), 12);
        assert_eq!(ImageFormat::of::<u8>().pixel_size(), 1);
        assert_eq!(ImageFormat::of::<[u16; 4]>().pixel_size(), 8);
    }

    #[test]
    fn test_order_channel_roundtrip() {
        for order in [ChannelOrder::R, ChannelOrder::Rg, ChannelOrder::Rgb, ChannelOrder::Rgba] {
            assert_eq!(ChannelOrder::from_channels(order.channels()), order);
        }
    }

    #[test]
    fn test_format_display() {
        let format = ImageFormat::new(ChannelOrder::Rgb, ChannelType::Float32);
        assert_eq!(format.to_string(), "RGB/f32");
    }

    #[test]
    fn test_matches() {
        let format = ImageFormat::of::<[f32; 3]>();
        assert!(format.matches::<[f32; 3]>());
        assert!(!format.matches::<[f32; 4]>());
        assert!(!format.matches::<[i32; 3]>());
    }
}
