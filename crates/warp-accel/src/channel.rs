//! Channel layout adapter
//!
//! Host images are naturally expressed as vectors of pixels (`Vec<[f32; 3]>`),
//! while device transfers move flat runs of scalars. This module converts
//! between the two without touching element values:
//!
//! - [`flatten`] turns `Vec<P>` into `Vec<P::Scalar>` with `CHANNELS` times as
//!   many elements, in the same order
//! - [`unflatten`] is its inverse and requires the scalar count to be a
//!   multiple of the channel count
//!
//! Both reuse the original allocation when the allocator layout permits and
//! fall back to a single copy otherwise. The result is identical either way.
//!
//! # Channel counts
//!
//! The channel count is carried at the type level. A [`Pixel`] is either a bare
//! [`Scalar`] (one channel) or an array `[T; N]` with `N` in `1..=4`. The marker
//! types [`OneChan`], [`TwoChan`], [`ThreeChan`] and [`FourChan`] map a channel
//! count to its pixel type through [`PixelOf`].

use crate::format::ChannelType;
use crate::{Error, Result};
use bytemuck::Pod;
use std::fmt;
use std::mem::{align_of, size_of};
use tracing::trace;

/// Number of channels in a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channels {
    /// One channel
    One,
    /// Two channels
    Two,
    /// Three channels
    Three,
    /// Four channels
    Four,
}

impl Channels {
    /// Channel count as a number
    pub const fn count(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
        }
    }

    /// Look up a channel count
    pub fn from_count(count: usize) -> Result<Self> {
        match count {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            4 => Ok(Self::Four),
            n => Err(Error::LayoutIncompatible(format!(
                "{} channels per pixel, expected 1 to 4",
                n
            ))),
        }
    }
}

impl fmt::Display for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

/// Scalar element type of a channel
pub trait Scalar: Pod + PartialEq + fmt::Debug + Send + Sync {
    /// Device channel type for this scalar
    const CHANNEL_TYPE: ChannelType;
}

macro_rules! impl_scalar {
    ($($ty:ty => $ct:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const CHANNEL_TYPE: ChannelType = ChannelType::$ct;
            }

            impl Pixel for $ty {
                type Scalar = $ty;
                const CHANNELS: Channels = Channels::One;
            }
        )*
    };
}

/// Host representation of one pixel
///
/// Implementors must be laid out exactly as `CHANNELS` consecutive scalars.
/// [`check_layout`] verifies this and every conversion in this module calls it
/// before reinterpreting memory.
pub trait Pixel: Pod + PartialEq + fmt::Debug + Send + Sync {
    /// Scalar type of each channel
    type Scalar: Scalar;

    /// Channels per pixel
    const CHANNELS: Channels;
}

impl_scalar! {
    i8 => SignedInt8,
    i16 => SignedInt16,
    i32 => SignedInt32,
    u8 => UnsignedInt8,
    u16 => UnsignedInt16,
    u32 => UnsignedInt32,
    f32 => Float32,
}

macro_rules! impl_array_pixel {
    ($($n:literal => $ch:ident),* $(,)?) => {
        $(
            impl<T: Scalar> Pixel for [T; $n] {
                type Scalar = T;
                const CHANNELS: Channels = Channels::$ch;
            }
        )*
    };
}

impl_array_pixel! {
    1 => One,
    2 => Two,
    3 => Three,
    4 => Four,
}

/// Type-level channel count
pub trait ChannelCount {
    /// Runtime channel count
    const CHANNELS: Channels;

    /// Pixel type with this many channels of `T`
    type Pixel<T: Scalar>: Pixel<Scalar = T>;
}

/// One channel per pixel
#[derive(Debug, Clone, Copy)]
pub struct OneChan;

/// Two channels per pixel
#[derive(Debug, Clone, Copy)]
pub struct TwoChan;

/// Three channels per pixel
#[derive(Debug, Clone, Copy)]
pub struct ThreeChan;

/// Four channels per pixel
#[derive(Debug, Clone, Copy)]
pub struct FourChan;

impl ChannelCount for OneChan {
    const CHANNELS: Channels = Channels::One;
    type Pixel<T: Scalar> = [T; 1];
}

impl ChannelCount for TwoChan {
    const CHANNELS: Channels = Channels::Two;
    type Pixel<T: Scalar> = [T; 2];
}

impl ChannelCount for ThreeChan {
    const CHANNELS: Channels = Channels::Three;
    type Pixel<T: Scalar> = [T; 3];
}

impl ChannelCount for FourChan {
    const CHANNELS: Channels = Channels::Four;
    type Pixel<T: Scalar> = [T; 4];
}

/// Pixel type for channel count `C` and scalar `T`
pub type PixelOf<C, T> = <C as ChannelCount>::Pixel<T>;

/// Verify that `P` is laid out as `P::CHANNELS` consecutive scalars
pub fn check_layout<P: Pixel>() -> Result<()> {
    let channels = P::CHANNELS.count();
    let scalar_size = size_of::<P::Scalar>();

    if size_of::<P>() != channels * scalar_size {
        return Err(Error::LayoutIncompatible(format!(
            "pixel is {} bytes, expected {} channels of {} bytes",
            size_of::<P>(),
            channels,
            scalar_size
        )));
    }

    if align_of::<P>() != align_of::<P::Scalar>() {
        return Err(Error::LayoutIncompatible(format!(
            "pixel alignment {} differs from scalar alignment {}",
            align_of::<P>(),
            align_of::<P::Scalar>()
        )));
    }

    Ok(())
}

/// Reinterpret a pixel vector as a flat scalar vector
pub fn flatten<P: Pixel>(pixels: Vec<P>) -> Result<Vec<P::Scalar>> {
    check_layout::<P>()?;

    match bytemuck::allocation::try_cast_vec::<P, P::Scalar>(pixels) {
        Ok(flat) => Ok(flat),
        Err((err, pixels)) => {
            trace!("flatten fell back to copy: {:?}", err);
            Ok(bytemuck::cast_slice::<P, P::Scalar>(&pixels).to_vec())
        }
    }
}

/// Reinterpret a flat scalar vector as a pixel vector
///
/// # Errors
/// `DimensionMismatch` if `scalars.len()` is not a multiple of `P::CHANNELS`
pub fn unflatten<P: Pixel>(scalars: Vec<P::Scalar>) -> Result<Vec<P>> {
    check_layout::<P>()?;
    check_multiple::<P>(scalars.len())?;

    // Reuse fails when the capacity is not a whole number of pixels
    match bytemuck::allocation::try_cast_vec::<P::Scalar, P>(scalars) {
        Ok(pixels) => Ok(pixels),
        Err((err, scalars)) => {
            trace!("unflatten fell back to copy: {:?}", err);
            Ok(bytemuck::cast_slice::<P::Scalar, P>(&scalars).to_vec())
        }
    }
}

/// Borrowing form of [`flatten`]
pub fn flatten_slice<P: Pixel>(pixels: &[P]) -> Result<&[P::Scalar]> {
    check_layout::<P>()?;
    Ok(bytemuck::cast_slice(pixels))
}

/// Borrowing form of [`unflatten`]
pub fn unflatten_slice<P: Pixel>(scalars: &[P::Scalar]) -> Result<&[P]> {
    check_layout::<P>()?;
    check_multiple::<P>(scalars.len())?;
    Ok(bytemuck::cast_slice(scalars))
}

fn check_multiple<P: Pixel>(len: usize) -> Result<()> {
    let channels = P::CHANNELS.count();
    let rem = len % channels;
    if rem != 0 {
        return Err(Error::dimension_mismatch(len + channels - rem, len));
    }
    Ok(())
}
