//! Sample type conversion.
//!
//! The over-the-wire encoding is interleaved 16-bit I/Q, big-endian, four
//! bytes per complex sample. The user-side type is chosen per call through
//! the [`Sample`] trait; conversions are branch-free per sample and never
//! allocate.

use num_complex::Complex;

/// Bytes per complex sample on the wire.
pub const OTW_BYTES_PER_SAMPLE: usize = 4;

/// Full-scale magnitude of a wire sample component.
const OTW_FULL_SCALE: f32 = 32767.0;

/// A user-side complex sample type convertible to and from the wire
/// encoding.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    /// Builds a sample from wire I/Q components.
    fn from_otw(i: i16, q: i16) -> Self;

    /// Splits a sample into wire I/Q components.
    fn to_otw(self) -> (i16, i16);
}

/// Floating-point baseband, full scale at ±1.0.
impl Sample for Complex<f32> {
    fn from_otw(i: i16, q: i16) -> Self {
        Self::new(f32::from(i) / OTW_FULL_SCALE, f32::from(q) / OTW_FULL_SCALE)
    }

    fn to_otw(self) -> (i16, i16) {
        let clip = |v: f32| (v * OTW_FULL_SCALE).clamp(-OTW_FULL_SCALE, OTW_FULL_SCALE) as i16;
        (clip(self.re), clip(self.im))
    }
}

/// Pass-through 16-bit baseband.
impl Sample for Complex<i16> {
    fn from_otw(i: i16, q: i16) -> Self {
        Self::new(i, q)
    }

    fn to_otw(self) -> (i16, i16) {
        (self.re, self.im)
    }
}

/// Decodes `out.len()` samples from a wire payload.
///
/// # Panics
///
/// Panics if `payload` is shorter than `out` requires; callers size the
/// output from the decoded payload length.
pub fn otw_to_samples<T: Sample>(payload: &[u8], out: &mut [T]) {
    for (chunk, sample) in payload
        .chunks_exact(OTW_BYTES_PER_SAMPLE)
        .zip(out.iter_mut())
    {
        let i = i16::from_be_bytes([chunk[0], chunk[1]]);
        let q = i16::from_be_bytes([chunk[2], chunk[3]]);
        *sample = T::from_otw(i, q);
    }
}

/// Encodes `input` samples into a wire payload.
///
/// # Panics
///
/// Panics if `payload` is shorter than `input` requires.
pub fn samples_to_otw<T: Sample>(input: &[T], payload: &mut [u8]) {
    for (sample, chunk) in input
        .iter()
        .zip(payload.chunks_exact_mut(OTW_BYTES_PER_SAMPLE))
    {
        let (i, q) = sample.to_otw();
        chunk[0..2].copy_from_slice(&i.to_be_bytes());
        chunk[2..4].copy_from_slice(&q.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sc16_roundtrip_is_exact() {
        let samples = [
            Complex::new(0i16, 0),
            Complex::new(123, -456),
            Complex::new(i16::MAX, i16::MIN),
        ];
        let mut wire = [0u8; 12];
        samples_to_otw(&samples, &mut wire);

        let mut back = [Complex::<i16>::default(); 3];
        otw_to_samples(&wire, &mut back);
        assert_eq!(samples, back);
    }

    #[test]
    fn wire_layout_is_big_endian_iq() {
        let samples = [Complex::new(0x0102i16, 0x0304)];
        let mut wire = [0u8; 4];
        samples_to_otw(&samples, &mut wire);
        assert_eq!(wire, [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn fc32_full_scale_maps_to_i16_limits() {
        let samples = [Complex::new(1.0f32, -1.0)];
        let mut wire = [0u8; 4];
        samples_to_otw(&samples, &mut wire);

        let mut back = [Complex::<i16>::default(); 1];
        otw_to_samples(&wire, &mut back);
        assert_eq!(back[0], Complex::new(32767, -32767));
    }

    #[test]
    fn fc32_clamps_overdrive() {
        let samples = [Complex::new(2.5f32, -3.0)];
        let mut wire = [0u8; 4];
        samples_to_otw(&samples, &mut wire);

        let mut back = [Complex::<i16>::default(); 1];
        otw_to_samples(&wire, &mut back);
        assert_eq!(back[0], Complex::new(32767, -32767));
    }

    #[test]
    fn fc32_roundtrip_is_close() {
        let samples = [Complex::new(0.5f32, -0.25)];
        let mut wire = [0u8; 4];
        samples_to_otw(&samples, &mut wire);

        let mut back = [Complex::<f32>::default(); 1];
        otw_to_samples(&wire, &mut back);
        assert!((back[0].re - 0.5).abs() < 1e-4);
        assert!((back[0].im + 0.25).abs() < 1e-4);
    }
}
