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

//! Spatial points.
//!
//! The coordinate reference system is carried as a raw SRID; well-known SRIDs
//! have constants below.

pub const SRID_CARTESIAN_2D: i64 = 7203;
pub const SRID_CARTESIAN_3D: i64 = 9157;
pub const SRID_WGS84_2D: i64 = 4326;
pub const SRID_WGS84_3D: i64 = 4979;

/// A two-dimensional point.
///
/// For [`SRID_WGS84_2D`], `x` is the longitude and `y` the latitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    pub srid: i64,
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new_cartesian(x: f64, y: f64) -> Self {
        Self {
            srid: SRID_CARTESIAN_2D,
            x,
            y,
        }
    }

    pub fn new_wgs84(longitude: f64, latitude: f64) -> Self {
        Self {
            srid: SRID_WGS84_2D,
            x: longitude,
            y: latitude,
        }
    }
}

/// A three-dimensional point.
///
/// For [`SRID_WGS84_3D`], `x` is the longitude, `y` the latitude, and `z` the
/// altitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub srid: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub fn new_cartesian(x: f64, y: f64, z: f64) -> Self {
        Self {
            srid: SRID_CARTESIAN_3D,
            x,
            y,
            z,
        }
    }

    pub fn new_wgs84(longitude: f64, latitude: f64, altitude: f64) -> Self {
        Self {
            srid: SRID_WGS84_3D,
            x: longitude,
            y: latitude,
            z: altitude,
        }
    }
}
