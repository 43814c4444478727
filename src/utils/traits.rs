use std::io::{Read, Write};

use anyhow::anyhow;
use serde::{de::DeserializeOwned, Serialize};

/// calculate the [blake3] hash of the legacy `bincode` encoding of a serializable object
pub fn digest_of<T: Serialize + ?Sized>(t: &T) -> anyhow::Result<[u8; 32]> {
    let encoded = bincode::serde::encode_to_vec(t, bincode::config::legacy())?;
    Ok(blake3::hash(&encoded).into())
}

/// Trait for an object which stores a digest of itself in one of its own fields.
/// The digest is computed with that field zeroed.
pub trait DigestInSelf: Serialize {
    /// the field holding the digest
    fn digest_field(&mut self) -> &mut [u8; 32];

    /// recompute and store the digest
    fn digest(&mut self) -> anyhow::Result<()> {
        *self.digest_field() = [0u8; 32];
        let digest = digest_of(&*self)?;
        *self.digest_field() = digest;
        Ok(())
    }

    /// check the stored digest against the current contents, leaving the object unchanged
    fn verify_digest(&mut self) -> anyhow::Result<bool> {
        let stored = *self.digest_field();
        *self.digest_field() = [0u8; 32];
        let computed = digest_of(&*self);
        *self.digest_field() = stored;
        Ok(stored == computed?)
    }
}

/// Trait for serializing and deserializing an object which stores digest in the object itself
/// # Note
/// This trait is implemented for all types implementing
/// [Serialize] and [DeserializeOwned] and [DigestInSelf]
pub trait SerializeAndDigest: Serialize + DeserializeOwned + DigestInSelf {
    /// serialize into a writer implementing [Write](std::io::Write),
    /// refreshing the digest first
    /// # Returns
    /// The number of bytes written if successful
    fn serialize_into<W>(&mut self, w: &mut W) -> anyhow::Result<usize>
    where
        W: Write,
    {
        self.digest()?;
        let config = bincode::config::legacy();
        bincode::serde::encode_into_std_write(&*self, w, config).map_err(|e| e.into())
    }

    /// serialize into a [Vec](std::vec::Vec)
    fn serialize(&mut self) -> anyhow::Result<Vec<u8>> {
        self.digest()?;
        let config = bincode::config::legacy();
        bincode::serde::encode_to_vec(&*self, config).map_err(|e| e.into())
    }

    /// deserialize from a reader implementing [Read](std::io::Read)
    /// # Returns
    /// The deserialized object if its digest verifies
    fn deserialize_from<R>(r: &mut R) -> anyhow::Result<Self>
    where
        R: Read,
    {
        let config = bincode::config::legacy();
        let mut object: Self = bincode::serde::decode_from_std_read(r, config)?;
        if !object.verify_digest()? {
            Err(anyhow!("deserialized object digest verification failed"))
        } else {
            Ok(object)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Cursor;

    #[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
    struct Sealed {
        value: u64,
        digest: [u8; 32],
    }

    impl DigestInSelf for Sealed {
        fn digest_field(&mut self) -> &mut [u8; 32] {
            &mut self.digest
        }
    }
    impl SerializeAndDigest for Sealed {}

    #[test]
    fn test_round_trip_verifies() -> anyhow::Result<()> {
        let mut sealed = Sealed {
            value: 7,
            ..Default::default()
        };
        let bytes = SerializeAndDigest::serialize(&mut sealed)?;
        assert_ne!(sealed.digest, [0u8; 32]);
        let restored = Sealed::deserialize_from(&mut Cursor::new(bytes))?;
        assert_eq!(restored, sealed);
        Ok(())
    }

    #[test]
    fn test_tampered_bytes_are_rejected() -> anyhow::Result<()> {
        let mut sealed = Sealed {
            value: 7,
            ..Default::default()
        };
        let mut bytes = SerializeAndDigest::serialize(&mut sealed)?;
        // `value` is the first field, little endian
        bytes[0] ^= 0xff;
        assert!(Sealed::deserialize_from(&mut Cursor::new(bytes)).is_err());
        Ok(())
    }
}
