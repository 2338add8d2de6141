// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod deserialize;
mod error;
mod serialize;
#[cfg(test)]
mod tests;

pub(crate) use deserialize::PackStreamDeserializer;
pub(crate) use error::{
    PackStreamDeserializeError, PackStreamDeserializeErrorKind, PackStreamSerializeError,
};
pub(crate) use serialize::{
    serialize_value, PackStreamSerializer, PackStreamTextRenderer, PackStreamWireSerializer,
};

/// PackStream structure signatures understood by the driver.
pub(crate) mod tags {
    pub(crate) const NODE: u8 = 0x4E;
    pub(crate) const RELATIONSHIP: u8 = 0x52;
    pub(crate) const UNBOUND_RELATIONSHIP: u8 = 0x72;
    pub(crate) const PATH: u8 = 0x50;
    pub(crate) const DATE: u8 = 0x44;
    pub(crate) const TIME: u8 = 0x54;
    pub(crate) const LOCAL_TIME: u8 = 0x74;
    pub(crate) const DATE_TIME: u8 = 0x46;
    pub(crate) const DATE_TIME_ZONE_ID: u8 = 0x66;
    pub(crate) const LOCAL_DATE_TIME: u8 = 0x64;
    pub(crate) const DURATION: u8 = 0x45;
    pub(crate) const POINT_2D: u8 = 0x58;
    pub(crate) const POINT_3D: u8 = 0x59;
}
