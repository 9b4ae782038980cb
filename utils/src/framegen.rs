//! Generator of moving test patterns in the three-plane 4:2:0 layout.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NewFrameGeneratorError {
    #[error("Invalid stride for plane {0}")]
    InvalidStride(usize),
}

#[derive(Debug, Error)]
pub enum GenerateFrameError {
    #[error("Provided plane {0} is too small")]
    BufferTooSmall(usize),
}

pub struct FrameGenerator {
    width: usize,
    height: usize,
    strides: [usize; 3],
    step: u32,
}

impl FrameGenerator {
    pub fn new(
        width: usize,
        height: usize,
        strides: [usize; 3],
    ) -> Result<Self, NewFrameGeneratorError> {
        if strides[0] < width {
            return Err(NewFrameGeneratorError::InvalidStride(0));
        }
        if let Some(plane) = (1..3).find(|&i| strides[i] < width / 2) {
            return Err(NewFrameGeneratorError::InvalidStride(plane));
        }

        Ok(FrameGenerator {
            width,
            height,
            strides,
            step: 0,
        })
    }

    /// Minimum size of each plane.
    pub fn plane_sizes(&self) -> [usize; 3] {
        [
            self.strides[0] * self.height,
            self.strides[1] * (self.height / 2),
            self.strides[2] * (self.height / 2),
        ]
    }

    pub fn next_frame(&mut self, planes: [&mut [u8]; 3]) -> Result<(), GenerateFrameError> {
        let sizes = self.plane_sizes();
        if let Some(plane) = (0..3).find(|&i| planes[i].len() < sizes[i]) {
            return Err(GenerateFrameError::BufferTooSmall(plane));
        }

        let [luma, cb, cr] = planes;
        self.gen_luma(luma);
        self.gen_chroma(cb, self.strides[1], 0);
        self.gen_chroma(cr, self.strides[2], 64);
        self.step = self.step.wrapping_add(1);

        Ok(())
    }

    fn gen_luma(&self, plane: &mut [u8]) {
        plane
            .chunks_exact_mut(self.strides[0])
            .take(self.height)
            .map(|l| &mut l[0..self.width])
            .enumerate()
            .for_each(|(y, line)| {
                line.iter_mut().enumerate().for_each(|(x, sample)| {
                    *sample = self.step.wrapping_add((x ^ y) as u32) as u8;
                });
            });
    }

    fn gen_chroma(&self, plane: &mut [u8], stride: usize, phase: u32) {
        plane
            .chunks_exact_mut(stride)
            .take(self.height / 2)
            .map(|l| &mut l[0..self.width / 2])
            .enumerate()
            .for_each(|(y, line)| {
                line.iter_mut().enumerate().for_each(|(x, sample)| {
                    *sample = (self.step / 2)
                        .wrapping_add(phase)
                        .wrapping_add((x + y) as u32) as u8;
                });
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_strides() {
        assert!(matches!(
            FrameGenerator::new(64, 32, [63, 32, 32]),
            Err(NewFrameGeneratorError::InvalidStride(0))
        ));
        assert!(matches!(
            FrameGenerator::new(64, 32, [64, 32, 31]),
            Err(NewFrameGeneratorError::InvalidStride(2))
        ));
    }

    #[test]
    fn pattern_moves() {
        let mut generator = FrameGenerator::new(4, 2, [8, 2, 2]).unwrap();
        assert_eq!(generator.plane_sizes(), [16, 2, 2]);

        let (mut y, mut u, mut v) = (vec![0u8; 16], vec![0u8; 2], vec![0u8; 2]);
        generator.next_frame([&mut y[..], &mut u[..], &mut v[..]]).unwrap();
        assert_eq!(&y[0..4], &[0, 1, 2, 3]);
        assert_eq!(&y[8..12], &[1, 0, 3, 2]);
        // Padding is left untouched.
        assert_eq!(&y[4..8], &[0, 0, 0, 0]);
        assert_eq!(v, vec![64, 65]);

        generator.next_frame([&mut y[..], &mut u[..], &mut v[..]]).unwrap();
        assert_eq!(&y[0..4], &[1, 2, 3, 4]);

        let mut short = vec![0u8; 1];
        assert!(matches!(
            generator.next_frame([&mut y[..], &mut u[..], &mut short[..]]),
            Err(GenerateFrameError::BufferTooSmall(2))
        ));
    }
}
