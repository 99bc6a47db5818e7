use std::fmt::Display;

/// frame slot 的标签：A, B, C...
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameLabel(usize);

impl FrameLabel {
    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        Self(idx)
    }
}

impl std::ops::Deref for FrameLabel {
    type Target = usize;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for FrameLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match u8::try_from(self.0).ok().filter(|idx| *idx < 26) {
            Some(idx) => write!(f, "{}", (b'A' + idx) as char),
            None => write!(f, "#{}", self.0),
        }
    }
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加，从 0 开始
    frame_id: u64,
    fif_count: usize,
}

impl FrameCounter {
    pub fn new(fif_count: usize) -> Self {
        assert!(fif_count > 0);
        Self { frame_id: 0, fif_count }
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }

    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize((self.frame_id % self.fif_count as u64) as usize)
    }

    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }

    /// 进入下一帧，返回新的 frame label
    pub fn advance(&mut self) -> FrameLabel {
        self.frame_id += 1;
        self.frame_label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_wraps_around() {
        let mut counter = FrameCounter::new(3);
        assert_eq!(*counter.frame_label(), 0);
        let labels = (0..4).map(|_| counter.advance().to_string()).collect::<Vec<_>>();
        assert_eq!(labels, vec!["B", "C", "A", "B"]);
        assert_eq!(counter.frame_name(), "[F4B]");
    }
}
