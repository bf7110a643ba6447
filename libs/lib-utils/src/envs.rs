use crate::b64::b64u_decode;
use crate::{Error, Result};
use std::env;
use std::str::FromStr;

pub fn get_env(name: &'static str) -> Result<String> {
    env::var(name).map_err(|_| Error::Env(name.to_string()))
}

pub fn get_env_parse<T: FromStr>(name: &'static str) -> Result<T> {
    let val = get_env(name)?;
    val.parse::<T>().map_err(|_| Error::Env(name.to_string()))
}

pub fn get_env_b64u_as_u8s(name: &'static str) -> Result<Vec<u8>> {
    b64u_decode(&get_env(name)?).map_err(|_| Error::Env(name.to_string()))
}
