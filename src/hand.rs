//! Hand sides and hand landmark names.

use std::ops::{Index, IndexMut};

/// Which hand a crop, heatmap stack or keypoint set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandSide {
    Left,
    Right,
}

impl HandSide {
    /// Both hand sides, in storage order.
    pub const ALL: [HandSide; 2] = [HandSide::Left, HandSide::Right];

    /// Returns the storage index of this side (0 for [`HandSide::Left`], 1 for
    /// [`HandSide::Right`]).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            HandSide::Left => 0,
            HandSide::Right => 1,
        }
    }
}

/// A pair of values, one per [`HandSide`].
///
/// Indexing is only possible through [`HandSide`], so call sites always spell out which hand they
/// mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Hands<T>([T; 2]);

impl<T> Hands<T> {
    pub fn new(left: T, right: T) -> Self {
        Self([left, right])
    }

    /// Creates a pair by invoking `f` once for each side, left first.
    pub fn from_fn(mut f: impl FnMut(HandSide) -> T) -> Self {
        Self([f(HandSide::Left), f(HandSide::Right)])
    }

    #[inline]
    pub fn left(&self) -> &T {
        &self.0[0]
    }

    #[inline]
    pub fn right(&self) -> &T {
        &self.0[1]
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Hands<U> {
        Hands(self.0.map(f))
    }

    pub fn as_ref(&self) -> Hands<&T> {
        Hands([&self.0[0], &self.0[1]])
    }

    /// Iterates over both values together with their [`HandSide`].
    pub fn iter(&self) -> impl Iterator<Item = (HandSide, &T)> + '_ {
        HandSide::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<HandSide> for Hands<T> {
    type Output = T;

    #[inline]
    fn index(&self, side: HandSide) -> &T {
        &self.0[side.index()]
    }
}

impl<T> IndexMut<HandSide> for Hands<T> {
    #[inline]
    fn index_mut(&mut self, side: HandSide) -> &mut T {
        &mut self.0[side.index()]
    }
}

/// Names for the 21 hand keypoints, in the channel order of hand heatmap networks.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandLandmark {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

impl HandLandmark {
    /// Number of hand keypoints produced by standard hand heatmap networks.
    pub const COUNT: usize = 21;

    pub const ALL: [HandLandmark; Self::COUNT] = {
        use HandLandmark::*;
        [
            Wrist,
            ThumbCmc,
            ThumbMcp,
            ThumbIp,
            ThumbTip,
            IndexFingerMcp,
            IndexFingerPip,
            IndexFingerDip,
            IndexFingerTip,
            MiddleFingerMcp,
            MiddleFingerPip,
            MiddleFingerDip,
            MiddleFingerTip,
            RingFingerMcp,
            RingFingerPip,
            RingFingerDip,
            RingFingerTip,
            PinkyMcp,
            PinkyPip,
            PinkyDip,
            PinkyTip,
        ]
    };

    /// Returns the landmark stored in heatmap channel `index`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}
