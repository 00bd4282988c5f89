use crate::models::error::StreamError;

/// Push destination for captured samples.
///
/// `buffer` is the caller's logical batch buffer; the new block occupies
/// `buffer[offset..offset + count]`. Successive deliveries within one batch
/// arrive at increasing offsets.
pub trait SampleSink {
    fn deliver_samples(&mut self, buffer: &[i16], offset: usize, count: usize) -> Result<(), StreamError>;
}

impl<F> SampleSink for F
where
    F: FnMut(&[i16], usize, usize),
{
    fn deliver_samples(&mut self, buffer: &[i16], offset: usize, count: usize) -> Result<(), StreamError> {
        self(buffer, offset, count);
        Ok(())
    }
}
