// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Host side of the H89 serial loader protocol: staged loader uploads,
//! whole-disk image transfers in both directions and ABS program uploads.

pub mod abs;
pub mod error;
pub mod handshake;
pub mod image;
pub mod interrupt;
pub mod loader;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod serial;
pub mod session;
pub mod volume;

pub use error::{Error, Result};
pub use image::{Direction, ImageFile};
pub use session::Session;
