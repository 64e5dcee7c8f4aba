//! Resource records embedded in every role config.

use crate::wire::{put_pad, put_u8, put_u32, put_u64, Cursor, Wire};
use crate::AbiError;
use alloc::vec::Vec;

/// A mapped memory region: virtual base and size. 16 bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RegionResource {
    pub vaddr: u64,
    pub size: u64,
}

impl Wire for RegionResource {
    const SIZE: usize = 16;

    fn write(&self, out: &mut Vec<u8>) {
        put_u64(out, self.vaddr);
        put_u64(out, self.size);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        Ok(Self {
            vaddr: c.u64()?,
            size: c.u64()?,
        })
    }
}

/// A mapped DMA-capable region: virtual base, physical base, size.
/// 24 bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceRegion {
    pub vaddr: u64,
    pub io_addr: u64,
    pub size: u64,
}

impl Wire for DeviceRegion {
    const SIZE: usize = 24;

    fn write(&self, out: &mut Vec<u8>) {
        put_u64(out, self.vaddr);
        put_u64(out, self.io_addr);
        put_u64(out, self.size);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        Ok(Self {
            vaddr: c.u64()?,
            io_addr: c.u64()?,
            size: c.u64()?,
        })
    }
}

/// Handle to a peer: one shared queue region, its slot capacity, and the
/// local id of the notification channel to that peer. 32 bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Connection {
    pub queue: RegionResource,
    pub capacity: u64,
    pub ch: u8,
}

impl Wire for Connection {
    const SIZE: usize = RegionResource::SIZE + 16;

    fn write(&self, out: &mut Vec<u8>) {
        self.queue.write(out);
        put_u64(out, self.capacity);
        put_u8(out, self.ch);
        put_pad(out, 7);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let queue = RegionResource::parse(c)?;
        let capacity = c.u64()?;
        let ch = c.u8()?;
        c.pad(7)?;
        Ok(Self {
            queue,
            capacity,
            ch,
        })
    }
}

/// A request/response queue pair sharing one channel, for address
/// resolution. 48 bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ArpConnection {
    pub request: RegionResource,
    pub response: RegionResource,
    pub capacity: u64,
    pub ch: u8,
}

impl Wire for ArpConnection {
    const SIZE: usize = 2 * RegionResource::SIZE + 16;

    fn write(&self, out: &mut Vec<u8>) {
        self.request.write(out);
        self.response.write(out);
        put_u64(out, self.capacity);
        put_u8(out, self.ch);
        put_pad(out, 7);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let request = RegionResource::parse(c)?;
        let response = RegionResource::parse(c)?;
        let capacity = c.u64()?;
        let ch = c.u8()?;
        c.pad(7)?;
        Ok(Self {
            request,
            response,
            capacity,
            ch,
        })
    }
}

/// Network identity of one interface: MAC, IPv4 address (network byte
/// order packed little-endian as a `u32`), subnet prefix length. 16 bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NetIdentity {
    pub mac: [u8; 6],
    pub ip: u32,
    pub subnet_len: u8,
}

impl Wire for NetIdentity {
    const SIZE: usize = 16;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.mac);
        put_pad(out, 2);
        put_u32(out, self.ip);
        put_u8(out, self.subnet_len);
        put_pad(out, 3);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let mac = c.bytes::<6>()?;
        c.pad(2)?;
        let ip = c.u32()?;
        let subnet_len = c.u8()?;
        c.pad(3)?;
        Ok(Self {
            mac,
            ip,
            subnet_len,
        })
    }
}

/// A live-count-prefixed list padded to a declared capacity.
///
/// The count is derived from the entries handed to
/// [`from_slice`](Self::from_slice); it cannot be set independently.
/// Entries past the count are written zeroed, so packing is deterministic.
/// 8 + `N` × entry bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClientList<T, const N: usize> {
    count: u32,
    items: [T; N],
}

impl<T: Wire, const N: usize> Default for ClientList<T, N> {
    fn default() -> Self {
        Self {
            count: 0,
            items: [T::default(); N],
        }
    }
}

impl<T: Wire, const N: usize> ClientList<T, N> {
    /// Build a list from the live entries. Fails when more entries are
    /// offered than the declared capacity; live entries are never
    /// truncated.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_slice(entries: &[T]) -> Result<Self, AbiError> {
        if entries.len() > N {
            return Err(AbiError::CountOutOfRange {
                count: entries.len() as u32,
                max: N as u32,
            });
        }
        let mut items = [T::default(); N];
        items[..entries.len()].copy_from_slice(entries);
        Ok(Self {
            count: entries.len() as u32,
            items,
        })
    }

    /// The live entries.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items[..self.count as usize]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl<T: Wire, const N: usize> Wire for ClientList<T, N> {
    const SIZE: usize = 8 + N * T::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        put_u32(out, self.count);
        put_pad(out, 4);
        for item in &self.items {
            item.write(out);
        }
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let count = c.u32()?;
        c.pad(4)?;
        if count as usize > N {
            return Err(AbiError::CountOutOfRange {
                count,
                max: N as u32,
            });
        }
        let mut items = [T::default(); N];
        for item in &mut items {
            *item = T::parse(c)?;
        }
        Ok(Self { count, items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Wire + PartialEq + core::fmt::Debug>(value: &T) {
        let mut bytes = Vec::new();
        value.write(&mut bytes);
        assert_eq!(bytes.len(), T::SIZE);
        let mut c = Cursor::new(&bytes);
        let back = T::parse(&mut c).unwrap();
        assert_eq!(&back, value);
        let mut again = Vec::new();
        back.write(&mut again);
        assert_eq!(again, bytes);
    }

    #[test]
    fn resources_round_trip_byte_exact() {
        round_trip(&RegionResource {
            vaddr: 0x200_0000,
            size: 0x1000,
        });
        round_trip(&DeviceRegion {
            vaddr: 0x240_0000,
            io_addr: 0x5800_0000,
            size: 0x20_0000,
        });
        round_trip(&Connection {
            queue: RegionResource {
                vaddr: 0x260_0000,
                size: 0x9000,
            },
            capacity: 512,
            ch: 7,
        });
        round_trip(&ArpConnection {
            request: RegionResource {
                vaddr: 0x270_0000,
                size: 0x2000,
            },
            response: RegionResource {
                vaddr: 0x270_2000,
                size: 0x2000,
            },
            capacity: 128,
            ch: 3,
        });
        round_trip(&NetIdentity {
            mac: [0, 1, 2, 3, 4, 5],
            ip: u32::from_le_bytes([192, 168, 1, 1]),
            subnet_len: 24,
        });
    }

    #[test]
    fn connection_layout_is_fixed() {
        let conn = Connection {
            queue: RegionResource {
                vaddr: 0x11,
                size: 0x22,
            },
            capacity: 0x33,
            ch: 0x44,
        };
        let mut bytes = Vec::new();
        conn.write(&mut bytes);
        assert_eq!(bytes[0], 0x11); // queue.vaddr, LE
        assert_eq!(bytes[8], 0x22); // queue.size
        assert_eq!(bytes[16], 0x33); // capacity
        assert_eq!(bytes[24], 0x44); // ch
        assert_eq!(&bytes[25..32], &[0u8; 7]); // padding
    }

    #[test]
    fn client_list_pads_with_zeroes_and_keeps_live_entries() {
        let live = [
            Connection {
                queue: RegionResource {
                    vaddr: 1,
                    size: 0x1000,
                },
                capacity: 512,
                ch: 0,
            },
            Connection {
                queue: RegionResource {
                    vaddr: 2,
                    size: 0x1000,
                },
                capacity: 512,
                ch: 1,
            },
        ];
        let list = ClientList::<Connection, 4>::from_slice(&live).unwrap();
        assert_eq!(list.as_slice(), &live);

        let mut bytes = Vec::new();
        list.write(&mut bytes);
        assert_eq!(bytes.len(), ClientList::<Connection, 4>::SIZE);
        // Slots past the live count are all zero.
        assert!(bytes[8 + 2 * Connection::SIZE..].iter().all(|&b| b == 0));
        round_trip(&list);
    }

    #[test]
    fn client_list_rejects_overflow_instead_of_truncating() {
        let entries = [RegionResource::default(); 5];
        let err = ClientList::<RegionResource, 4>::from_slice(&entries).unwrap_err();
        assert_eq!(err, AbiError::CountOutOfRange { count: 5, max: 4 });
    }
}
