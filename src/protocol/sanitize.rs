//! Post-decode cleanup of string fields.
//!
//! Fixed-width decoding hands back strings with their NUL padding. Before
//! any listener sees a packet, every string field has its NUL characters
//! removed and surrounding whitespace trimmed. Other fields pass through.

use crate::core::packet::{
    AuthRequest, AuthResponse, FontInstallRequest, FontInstallResponse, Packet,
};

pub trait Sanitize {
    fn sanitize(&mut self);
}

impl Sanitize for String {
    fn sanitize(&mut self) {
        if self.contains('\0') {
            self.retain(|c| c != '\0');
        }
        let trimmed = self.trim();
        if trimmed.len() != self.len() {
            *self = trimmed.to_owned();
        }
    }
}

macro_rules! passthrough {
    ($($t:ty),*) => {
        $(impl Sanitize for $t {
            #[inline]
            fn sanitize(&mut self) {}
        })*
    };
}

passthrough!(bool, u8, u16, u32, u64, i32, i64);

impl<T: Sanitize> Sanitize for Option<T> {
    fn sanitize(&mut self) {
        if let Some(inner) = self {
            inner.sanitize();
        }
    }
}

impl<T: Sanitize> Sanitize for Vec<T> {
    fn sanitize(&mut self) {
        for item in self.iter_mut() {
            item.sanitize();
        }
    }
}

/// Implement [`Sanitize`] for a struct by walking the listed fields.
macro_rules! sanitize_fields {
    ($t:ty { $($field:ident),* $(,)? }) => {
        impl Sanitize for $t {
            fn sanitize(&mut self) {
                $(self.$field.sanitize();)*
            }
        }
    };
}

sanitize_fields!(AuthRequest {
    version,
    client_name,
    client_hwid
});
sanitize_fields!(AuthResponse { success, message });
sanitize_fields!(FontInstallRequest {
    file_hash,
    name,
    style,
    file_type,
    install
});
sanitize_fields!(FontInstallResponse { success, message });

impl Sanitize for Packet {
    fn sanitize(&mut self) {
        match self {
            Packet::AuthRequest(p) => p.sanitize(),
            Packet::AuthResponse(p) => p.sanitize(),
            Packet::FontInstallRequest(p) => p.sanitize(),
            Packet::FontInstallResponse(p) => p.sanitize(),
        }
    }
}

/// Sanitize by value
pub fn sanitized<T: Sanitize>(mut value: T) -> T {
    value.sanitize();
    value
}
