//! Chronologically sortable keys for push-appended documents.
//!
//! 8 characters of millisecond timestamp followed by 12 random characters,
//! drawn from an alphabet whose ASCII order matches its digit order. Keys
//! generated in the same millisecond increment the random tail so ordering
//! is strict within one generator.

use std::sync::Mutex;
use uuid::Uuid;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

pub const PUSH_ID_LEN: usize = 20;

#[derive(Default)]
struct State {
    last_ms: i64,
    last_rand: [u8; 12],
}

#[derive(Default)]
pub struct PushIdGenerator {
    state: Mutex<State>,
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, now_ms: i64) -> String {
        let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let duplicate = now_ms == st.last_ms;
        st.last_ms = now_ms;

        if duplicate {
            for i in (0..12).rev() {
                if st.last_rand[i] == 63 {
                    st.last_rand[i] = 0;
                } else {
                    st.last_rand[i] += 1;
                    break;
                }
            }
        } else {
            let noise = Uuid::new_v4();
            for (slot, b) in st.last_rand.iter_mut().zip(noise.as_bytes()) {
                *slot = b % 64;
            }
        }

        let mut out = [0u8; PUSH_ID_LEN];
        let mut t = now_ms.max(0) as u64;
        for i in (0..8).rev() {
            out[i] = PUSH_CHARS[(t % 64) as usize];
            t /= 64;
        }
        for (i, r) in st.last_rand.iter().enumerate() {
            out[8 + i] = PUSH_CHARS[*r as usize];
        }
        out.iter().map(|b| *b as char).collect()
    }
}
