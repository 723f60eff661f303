use crate::timer::TimerToken;

/// The only two things that ever happen to a flow's controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Ack(u64),
    Timeout(TimerToken),
}
