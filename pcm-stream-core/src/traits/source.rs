/// Result of asking a producer for samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    /// This many samples were written to the front of the destination.
    Samples(usize),
    /// No more data; the play loop stops without submitting.
    EndOfStream,
}

/// Pull source for playback.
///
/// `dest` is a view straight into the next slot; its length is the maximum
/// number of samples the producer may return.
pub trait SampleSource {
    fn request_samples(&mut self, dest: &mut [i16]) -> Pull;
}

impl<F> SampleSource for F
where
    F: FnMut(&mut [i16]) -> Pull,
{
    fn request_samples(&mut self, dest: &mut [i16]) -> Pull {
        self(dest)
    }
}

/// Plays back an in-memory sample buffer once.
#[derive(Debug, Clone)]
pub struct VecSource {
    samples: Vec<i16>,
    position: usize,
}

impl VecSource {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

impl SampleSource for VecSource {
    fn request_samples(&mut self, dest: &mut [i16]) -> Pull {
        if self.position >= self.samples.len() {
            return Pull::EndOfStream;
        }
        let count = dest.len().min(self.remaining());
        dest[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        Pull::Samples(count)
    }
}
